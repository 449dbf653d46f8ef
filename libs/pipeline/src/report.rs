//! Where dispatch failures and unmapped provider codes end up.

use std::sync::Arc;

use async_trait::async_trait;
use gup_bus::{SharedBus, to_value};
use gup_core::{AckEvent, InboundEnvelope, dlq_subject};
use gup_telemetry::{TelemetryLabels, record_counter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{error, info, warn};

use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Payload stored for each failed envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub channel: String,
    pub stage: String,
    pub msg_id: String,
    pub ts: String,
    pub error: ErrorDetail,
    pub envelope: Value,
}

impl ErrorRecord {
    pub fn new(channel: &str, err: &DispatchError, envelope: &InboundEnvelope) -> Self {
        let ts = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".into());
        Self {
            channel: channel.to_string(),
            stage: err.stage().to_string(),
            msg_id: envelope.payload.id.clone(),
            ts,
            error: ErrorDetail {
                code: err.code().to_string(),
                message: format!("{err:#}"),
            },
            envelope: serde_json::to_value(envelope).unwrap_or(Value::Null),
        }
    }
}

#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn report(&self, record: ErrorRecord);
}

pub type SharedErrorSink = Arc<dyn ErrorSink>;

#[derive(Clone, Copy, Default)]
pub struct LogErrorSink;

#[async_trait]
impl ErrorSink for LogErrorSink {
    async fn report(&self, record: ErrorRecord) {
        error!(
            channel = %record.channel,
            stage = %record.stage,
            msg_id = %record.msg_id,
            code = %record.error.code,
            error = %record.error.message,
            "dispatch failed"
        );
    }
}

/// Publishes error records on `gupshup.dlq.<channel>.<stage>`.
#[derive(Clone)]
pub struct BusErrorSink {
    bus: SharedBus,
}

impl BusErrorSink {
    pub fn new(bus: SharedBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ErrorSink for BusErrorSink {
    async fn report(&self, record: ErrorRecord) {
        LogErrorSink.report(record.clone()).await;
        let subject = dlq_subject(&record.channel, &record.stage);
        let payload = match to_value(&record) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "could not encode error record");
                return;
            }
        };
        match self.bus.publish_value(&subject, payload).await {
            Ok(()) => {
                let labels = TelemetryLabels::new(record.channel.as_str())
                    .with("stage", record.stage.as_str())
                    .with("code", record.error.code.as_str());
                record_counter("dlq_published", 1, &labels);
                info!(
                    channel = %record.channel,
                    stage = %record.stage,
                    msg_id = %record.msg_id,
                    "error record published"
                );
            }
            Err(err) => warn!(subject = %subject, error = %err, "error record publish failed"),
        }
    }
}

/// Operator alerts for provider error codes missing from the table.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn unmapped_error_code(&self, channel: &str, code: i64, event: &AckEvent);
}

pub type SharedAlertSink = Arc<dyn AlertSink>;

#[derive(Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn unmapped_error_code(&self, channel: &str, code: i64, event: &AckEvent) {
        error!(
            channel,
            code,
            gs_id = %event.provider_message_id,
            reason = ?event.reason,
            "unmapped provider error code"
        );
        let labels = TelemetryLabels::new(channel).with("code", code.to_string());
        record_counter("ack_unmapped_error_code", 1, &labels);
    }
}
