//! Tracing and metric helpers shared by the pipeline crates.
//! Provides subscriber installation, span utilities, and metric recorders
//! built on top of the `metrics` facade.

use anyhow::Result;

mod config;
mod context;
mod metrics;
mod tracing_init;

pub use config::TelemetryConfig;
pub use context::{MessageContext, TelemetryLabels};
pub use self::metrics::{
    record_counter, record_gauge, record_histogram, set_telemetry_enabled, telemetry_enabled,
    with_common_fields,
};
pub use tracing_init::init_telemetry;

/// Installs the shared subscriber configured from `RUST_LOG` and `LOG_FORMAT`.
pub fn install(service_name: &str) -> Result<()> {
    init_telemetry(TelemetryConfig::from_env(service_name))
}
