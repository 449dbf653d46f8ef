//! Gupshup ingress service: receives WhatsApp webhooks and runs them through
//! the inbound pipeline.
//!
//! ```text
//! Gupshup calls `/ingress/gupshup/{channel}`; ack updates are published on
//! `gupshup.ack.{channel}` and failed envelopes on `gupshup.dlq.{channel}.{stage}`.
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use gup_bus::{InMemoryBusClient, NatsBusClient, SharedBus};
use gup_core::{
    MemoryCache, RedisCache, SharedCache, SharedUploader, TemplateStatusSink,
    TemplateStatusUpdate,
    memory::{MemoryActivityStore, MemoryConversationStore},
};
use gup_idhash::{
    IdHashConfig, IdHashStore, InMemoryIdHashRepository, NatsKvIdHashRepository,
    SharedIdHashRepository,
};
use gup_outbox::{
    InMemoryOutboxStore, NatsKvOutboxStore, Outbox, OutboxConfig, SharedOutboxStore,
};
use gup_pipeline::{
    BusErrorSink, Collaborators, Dispatcher, HttpMediaSource, LogAlertSink, LogErrorSink,
    PipelineConfig, SharedErrorSink,
};
use tracing::info;

pub mod channels;
pub mod config;
pub mod error;
pub mod http;
pub mod reqid;
pub mod uploader;

pub use config::IngressConfig;
pub use http::router;

use channels::load_channels;
use uploader::{DisabledUploader, HttpUploader};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
}

/// Template status changes end up in the service log.
#[derive(Clone, Copy, Default)]
pub struct LogTemplateSink;

#[async_trait]
impl TemplateStatusSink for LogTemplateSink {
    async fn update_status(
        &self,
        channel_token: &str,
        update: TemplateStatusUpdate,
    ) -> Result<()> {
        info!(
            channel = channel_token,
            template = %update.template_id,
            status = %update.status,
            reason = ?update.rejected_reason,
            "template status changed"
        );
        Ok(())
    }
}

/// Everything `main` needs: the router state plus the outbox whose sweeper
/// has to run next to it.
pub struct Service {
    pub state: AppState,
    pub outbox: Outbox,
}

struct Transport {
    bus: SharedBus,
    idhash_repository: SharedIdHashRepository,
    outbox_store: SharedOutboxStore,
    errors: SharedErrorSink,
}

async fn transport(
    config: &IngressConfig,
    idhash: &IdHashConfig,
    outbox: &OutboxConfig,
) -> Result<Transport> {
    match config.nats_url.as_deref() {
        Some(url) => {
            let nats = NatsBusClient::connect(url).await?;
            let js = async_nats::jetstream::new(nats.client().clone());
            let bus: SharedBus = Arc::new(nats);
            info!(url, "using NATS bus and JetStream KV stores");
            Ok(Transport {
                idhash_repository: Arc::new(
                    NatsKvIdHashRepository::new(&js, &idhash.namespace).await?,
                ),
                outbox_store: Arc::new(NatsKvOutboxStore::new(&js, &outbox.namespace).await?),
                errors: Arc::new(BusErrorSink::new(bus.clone())),
                bus,
            })
        }
        None => {
            info!("NATS_URL not set; using in-memory bus and stores");
            Ok(Transport {
                bus: Arc::new(InMemoryBusClient::new()),
                idhash_repository: Arc::new(InMemoryIdHashRepository::new()),
                outbox_store: Arc::new(InMemoryOutboxStore::new()),
                errors: Arc::new(LogErrorSink),
            })
        }
    }
}

async fn cache(config: &IngressConfig) -> Result<SharedCache> {
    match config.redis_url.as_deref() {
        Some(url) => {
            info!("using redis cache");
            Ok(Arc::new(
                RedisCache::connect(url, config.cache_namespace.clone()).await?,
            ))
        }
        None => Ok(Arc::new(MemoryCache::new())),
    }
}

/// Wires the pipeline from environment-derived configuration.
pub async fn build_service(config: &IngressConfig) -> Result<Service> {
    let idhash_config = IdHashConfig::from_env();
    let outbox_config = OutboxConfig::from_env();
    let pipeline_config = PipelineConfig::from_env();

    let Transport {
        bus,
        idhash_repository,
        outbox_store,
        errors,
    } = transport(config, &idhash_config, &outbox_config).await?;
    let cache = cache(config).await?;
    let http_client = reqwest::Client::new();

    let uploader: SharedUploader = match config.upload_base_url.as_deref() {
        Some(base) => Arc::new(HttpUploader::new(http_client.clone(), base)),
        None => Arc::new(DisabledUploader),
    };
    let activities = Arc::new(MemoryActivityStore::new());
    let conversations = Arc::new(MemoryConversationStore::new(activities.clone()));
    let outbox = Outbox::new(bus, outbox_store, outbox_config);

    let dispatcher = Dispatcher::new(
        Collaborators {
            conversations,
            activities,
            uploader,
            channels: Arc::new(load_channels(&config.channels_path)?),
            templates: Arc::new(LogTemplateSink),
            idhash: Arc::new(IdHashStore::new(
                cache.clone(),
                idhash_repository,
                idhash_config,
            )),
            cache,
            media: Arc::new(HttpMediaSource::new(http_client)),
            outbox: outbox.clone(),
            errors,
            alerts: Arc::new(LogAlertSink),
        },
        pipeline_config,
    );

    Ok(Service {
        state: AppState { dispatcher },
        outbox,
    })
}
