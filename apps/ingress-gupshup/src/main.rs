use anyhow::Result;
use gup_ingress_gupshup::{IngressConfig, build_service, router};
use gup_telemetry::install as init_telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry("ingress-gupshup")?;
    let config = IngressConfig::from_env()?;
    let service = build_service(&config).await?;

    let sweeper = service
        .outbox
        .enabled()
        .then(|| service.outbox.spawn_sweeper());

    info!("ingress-gupshup listening on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, router(service.state).into_make_service()).await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    Ok(())
}
