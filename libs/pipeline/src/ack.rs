//! Delivery acknowledgment reconciliation.
//!
//! Each provider status event is resolved to the internal activity hash,
//! written onto the activity and published as an ack update. Acks are applied
//! in arrival order; a late `delivered` after `read` is written as-is.

use std::sync::Arc;

use anyhow::Result;
use gup_core::{
    AckEvent, AckStatus, AckType, AckUpdate, ConversationRef, SharedActivityStore, SharedCache,
    SharedConversationStore, ack_subject,
};
use gup_idhash::{IdHashStore, LookupStage};
use gup_outbox::Outbox;
use gup_telemetry::{TelemetryLabels, record_counter, record_histogram};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::report::SharedAlertSink;

/// Watchdog key cleared once the provider accepts a message for `phone`.
pub fn missing_received_key(phone: &str) -> String {
    format!("missing-received:{phone}")
}

/// Maps a provider error code through the fixed table.
pub fn process_error(code: i64) -> AckType {
    AckType::from_error_code(code)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Status that does not move the ack state (`enqueued`, `deleted`, ...).
    Ignored,
    /// No tier knew the provider id.
    Unresolved,
    Published {
        ack: AckType,
        hash: String,
        stage: LookupStage,
    },
}

#[derive(Clone)]
pub struct AckReconciler {
    idhash: Arc<IdHashStore>,
    activities: SharedActivityStore,
    conversations: SharedConversationStore,
    cache: SharedCache,
    outbox: Outbox,
    alerts: SharedAlertSink,
}

impl AckReconciler {
    pub fn new(
        idhash: Arc<IdHashStore>,
        activities: SharedActivityStore,
        conversations: SharedConversationStore,
        cache: SharedCache,
        outbox: Outbox,
        alerts: SharedAlertSink,
    ) -> Self {
        Self {
            idhash,
            activities,
            conversations,
            cache,
            outbox,
            alerts,
        }
    }

    fn ack_for(&self, event: &AckEvent) -> Option<AckType> {
        match event.status {
            AckStatus::Sent => Some(AckType::ServerAck),
            AckStatus::Delivered => Some(AckType::DeliveryAck),
            AckStatus::Read => Some(AckType::Read),
            AckStatus::Failed => Some(match event.error_code {
                Some(code) => process_error(code),
                None => {
                    warn!(gs_id = %event.provider_message_id, "failed event without error code");
                    AckType::Error500
                }
            }),
            AckStatus::Enqueued | AckStatus::Other(_) => None,
        }
    }

    pub async fn reconcile(
        &self,
        channel: &str,
        workspace_id: Option<&str>,
        event: &AckEvent,
    ) -> Result<AckOutcome> {
        let Some(ack) = self.ack_for(event) else {
            debug!(channel, gs_id = %event.provider_message_id, status = event.status.as_str(), "ack status ignored");
            return Ok(AckOutcome::Ignored);
        };
        let labels = TelemetryLabels::new(channel).with_msg_id(event.provider_message_id.as_str());

        let Some(resolved) = self.idhash.lookup(&event.provider_message_id).await? else {
            debug!(channel, gs_id = %event.provider_message_id, "ack for unknown message dropped");
            record_counter("ack_unresolved", 1, &labels);
            return Ok(AckOutcome::Unresolved);
        };
        let hash = resolved.record.internal_hash.clone();

        let started = Instant::now();
        let conversation = self.materialize(&hash, ack, event).await?;
        record_histogram(
            "ack_stage_seconds",
            started.elapsed().as_secs_f64(),
            &TelemetryLabels::new(channel).with("stage", "materialization"),
        );

        self.side_effects(channel, ack, event, conversation.as_ref())
            .await?;

        let started = Instant::now();
        let workspace = workspace_id
            .map(str::to_string)
            .or_else(|| resolved.record.workspace_id.clone());
        let update = AckUpdate::new(ack, hash.clone(), event.timestamp, workspace, conversation);
        match serde_json::to_value(&update) {
            Ok(payload) => {
                if let Err(err) = self
                    .outbox
                    .publish(channel, &ack_subject(channel), payload)
                    .await
                {
                    warn!(channel, hash = %hash, error = %err, "ack update publish failed");
                }
            }
            Err(err) => warn!(channel, hash = %hash, error = %err, "ack update not encodable"),
        }
        record_histogram(
            "ack_stage_seconds",
            started.elapsed().as_secs_f64(),
            &TelemetryLabels::new(channel).with("stage", "publish"),
        );
        record_counter("ack_reconciled", 1, &labels.with("ack", ack.name()));
        info!(channel, hash = %hash, ack = ack.value(), stage = resolved.stage.as_str(), "ack reconciled");

        Ok(AckOutcome::Published {
            ack,
            hash,
            stage: resolved.stage,
        })
    }

    async fn materialize(
        &self,
        hash: &str,
        ack: AckType,
        event: &AckEvent,
    ) -> Result<Option<ConversationRef>> {
        let conversation = self.activities.conversation_by_hash(hash).await?;
        self.activities
            .update_ack(hash, ack, event.timestamp)
            .await?;
        Ok(conversation)
    }

    async fn side_effects(
        &self,
        channel: &str,
        ack: AckType,
        event: &AckEvent,
        conversation: Option<&ConversationRef>,
    ) -> Result<()> {
        match ack {
            AckType::ServerAck => {
                if let Some(phone) = event.destination.as_deref() {
                    self.cache.delete(&missing_received_key(phone)).await?;
                }
            }
            AckType::Read => {
                self.idhash
                    .expire(
                        &event.provider_message_id,
                        self.idhash.config().read_expiry,
                    )
                    .await?;
            }
            AckType::Unmapped(code) => {
                self.alerts.unmapped_error_code(channel, code, event).await;
            }
            _ => {}
        }
        if ack.is_invalid_number() {
            match conversation {
                Some(conversation) => {
                    self.conversations
                        .mark_invalid_destination(&conversation.id, event.destination.as_deref())
                        .await?;
                    info!(channel, conversation = %conversation.id, ack = ack.value(), "destination marked invalid");
                }
                None => warn!(channel, ack = ack.value(), "invalid destination without conversation"),
            }
        }
        Ok(())
    }
}
