//! At-least-once publishing for bus events.
//!
//! Entries are persisted before the first publish attempt and removed once the
//! bus accepts them. A background sweeper retries whatever is left with
//! exponential backoff.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gup_bus::InMemoryBusClient;
//! use gup_outbox::{InMemoryOutboxStore, Outbox, OutboxConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! # let rt = tokio::runtime::Runtime::new()?;
//! rt.block_on(async {
//!     let outbox = Outbox::new(
//!         Arc::new(InMemoryBusClient::new()),
//!         Arc::new(InMemoryOutboxStore::new()),
//!         OutboxConfig::default(),
//!     );
//!     outbox
//!         .publish("tok", "gupshup.ack.tok", serde_json::json!({"ack": 1}))
//!         .await?;
//!     let _sweeper = outbox.spawn_sweeper();
//!     anyhow::Ok(())
//! })
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use gup_bus::SharedBus;
use gup_telemetry::{TelemetryLabels, record_counter, record_gauge};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod backoff;
mod store;

pub use backoff::retry_delay;
pub use store::{InMemoryOutboxStore, NatsKvOutboxStore, OutboxStore, SharedOutboxStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: String,
    pub channel: String,
    pub subject: String,
    pub payload: Value,
    pub attempts: u32,
    #[serde(rename = "createdAt")]
    pub created_at_ms: i64,
    #[serde(default)]
    pub next_attempt_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl OutboxEntry {
    pub fn new(channel: &str, subject: &str, payload: Value) -> Self {
        let now = now_ms();
        Self {
            id: nanoid!(),
            channel: channel.to_string(),
            subject: subject.to_string(),
            payload,
            attempts: 0,
            created_at_ms: now,
            next_attempt_ms: now,
            last_error: None,
        }
    }

    pub fn due(&self, now_ms: i64) -> bool {
        self.next_attempt_ms <= now_ms
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// When false, publishes go straight to the bus and failures are only logged.
    pub enabled: bool,
    pub sweep_interval: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub namespace: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval: Duration::from_secs(5),
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            namespace: "gupshup-outbox".into(),
        }
    }
}

impl OutboxConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(value) = std::env::var("OUTBOX_ENABLED") {
            cfg.enabled = !matches!(
                value.trim().to_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        if let Some(secs) = std::env::var("OUTBOX_SWEEP_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            cfg.sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Ok(ns) = std::env::var("JS_KV_NAMESPACE_OUTBOX") {
            if !ns.trim().is_empty() {
                cfg.namespace = ns;
            }
        }
        cfg
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub published: usize,
    pub failed: usize,
    pub deferred: usize,
}

#[derive(Clone)]
pub struct Outbox {
    bus: SharedBus,
    store: SharedOutboxStore,
    config: OutboxConfig,
}

impl Outbox {
    pub fn new(bus: SharedBus, store: SharedOutboxStore, config: OutboxConfig) -> Self {
        Self { bus, store, config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Persists then publishes. A failed publish stays in the store for the
    /// sweeper and is not reported as an error; only store failures are.
    pub async fn publish(&self, channel: &str, subject: &str, payload: Value) -> Result<()> {
        if !self.config.enabled {
            if let Err(err) = self.bus.publish_value(subject, payload).await {
                warn!(channel, subject, error = %err, "publish failed");
                record_counter("outbox_publish_failed", 1, &TelemetryLabels::new(channel));
            }
            return Ok(());
        }

        let mut entry = OutboxEntry::new(channel, subject, payload);
        self.store.put(&entry).await?;
        self.attempt(&mut entry).await?;
        Ok(())
    }

    /// Returns whether the entry reached the bus.
    async fn attempt(&self, entry: &mut OutboxEntry) -> Result<bool> {
        let labels = TelemetryLabels::new(entry.channel.as_str());
        match self
            .bus
            .publish_value(&entry.subject, entry.payload.clone())
            .await
        {
            Ok(()) => {
                self.store.remove(&entry.id).await?;
                record_counter("outbox_published", 1, &labels);
                Ok(true)
            }
            Err(err) => {
                let delay = retry_delay(entry.attempts, self.config.retry_base, self.config.retry_max);
                entry.attempts += 1;
                entry.last_error = Some(err.to_string());
                entry.next_attempt_ms = now_ms() + delay.as_millis() as i64;
                self.store.put(entry).await?;
                warn!(
                    channel = %entry.channel,
                    subject = %entry.subject,
                    id = %entry.id,
                    attempts = entry.attempts,
                    error = %err,
                    "publish failed; left in outbox"
                );
                record_counter("outbox_publish_failed", 1, &labels);
                Ok(false)
            }
        }
    }

    /// Retries every due entry once.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = now_ms();
        let mut report = SweepReport::default();
        for mut entry in self.store.pending().await? {
            if !entry.due(now) {
                report.deferred += 1;
                continue;
            }
            if self.attempt(&mut entry).await? {
                report.published += 1;
            } else {
                report.failed += 1;
            }
        }
        record_gauge(
            "outbox_pending",
            (report.failed + report.deferred) as i64,
            &TelemetryLabels::new("all"),
        );
        if report.published + report.failed > 0 {
            debug!(?report, "outbox sweep finished");
        }
        Ok(report)
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let outbox = self.clone();
        tokio::spawn(async move {
            info!(interval = ?outbox.config.sweep_interval, "outbox sweeper started");
            let mut ticker = tokio::time::interval(outbox.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = outbox.sweep_once().await {
                    warn!(error = %err, "outbox sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_serializes_camel_case() {
        let entry = OutboxEntry::new("tok", "gupshup.ack.tok", json!({"ack": 2}));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["subject"], "gupshup.ack.tok");
        assert_eq!(value["attempts"], 0);
        assert!(value["createdAt"].is_i64());
        assert!(value.get("lastError").is_none());
        assert_eq!(entry.id.len(), 21);
    }

    #[test]
    fn disabled_flag_parses() {
        // SAFETY: single-threaded test touching one variable.
        unsafe { std::env::set_var("OUTBOX_ENABLED", "false") };
        assert!(!OutboxConfig::from_env().enabled);
        unsafe { std::env::remove_var("OUTBOX_ENABLED") };
        assert!(OutboxConfig::from_env().enabled);
    }
}
