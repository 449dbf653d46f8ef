//! Provider message id to internal activity hash mapping.
//!
//! Acks reference messages by the provider's id while activities are keyed by
//! the internal hash. The mapping lives in a short-lived cache tier (written on
//! every send/receive) backed by a durable repository that is consulted only
//! when the cache misses twice.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use gup_core::SharedCache;
use gup_telemetry::{TelemetryLabels, record_histogram};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

mod repository;

pub use repository::{
    IdHashRepository, InMemoryIdHashRepository, NatsKvIdHashRepository, SharedIdHashRepository,
};

const CACHE_PREFIX: &str = "idhash";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdHashRecord {
    pub provider_message_id: String,
    pub internal_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

impl IdHashRecord {
    pub fn new(provider_message_id: impl Into<String>, internal_hash: impl Into<String>) -> Self {
        Self {
            provider_message_id: provider_message_id.into(),
            internal_hash: internal_hash.into(),
            conversation_id: None,
            workspace_id: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStage {
    CacheHit,
    DelayRetry,
    DurableFallback,
    Miss,
}

impl LookupStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LookupStage::CacheHit => "cache_hit",
            LookupStage::DelayRetry => "delay_retry",
            LookupStage::DurableFallback => "durable_fallback",
            LookupStage::Miss => "miss",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHash {
    pub record: IdHashRecord,
    pub stage: LookupStage,
}

/// Configuration derived at runtime.
#[derive(Debug, Clone)]
pub struct IdHashConfig {
    pub cache_ttl: Duration,
    pub retry_delay: Duration,
    pub read_expiry: Duration,
    pub namespace: String,
}

impl Default for IdHashConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            retry_delay: Duration::from_millis(1000),
            read_expiry: Duration::from_secs(10),
            namespace: "gupshup-idhash".to_string(),
        }
    }
}

impl IdHashConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = env_u64("IDHASH_CACHE_TTL_SECS") {
            cfg.cache_ttl = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = env_u64("IDHASH_RETRY_DELAY_MS") {
            cfg.retry_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("IDHASH_READ_EXPIRY_SECS") {
            cfg.read_expiry = Duration::from_secs(secs.max(1));
        }
        if let Ok(ns) = std::env::var("JS_KV_NAMESPACE_IDHASH") {
            if !ns.trim().is_empty() {
                cfg.namespace = ns;
            }
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[derive(Clone)]
pub struct IdHashStore {
    cache: SharedCache,
    repository: SharedIdHashRepository,
    config: IdHashConfig,
}

impl IdHashStore {
    pub fn new(cache: SharedCache, repository: SharedIdHashRepository, config: IdHashConfig) -> Self {
        Self {
            cache,
            repository,
            config,
        }
    }

    pub fn config(&self) -> &IdHashConfig {
        &self.config
    }

    fn cache_key(provider_message_id: &str) -> String {
        format!("{CACHE_PREFIX}:{provider_message_id}")
    }

    /// Writes the fast tier. Rewriting an identical cached value is a no-op.
    pub async fn set(&self, record: &IdHashRecord) -> Result<()> {
        let key = Self::cache_key(&record.provider_message_id);
        let value = serde_json::to_string(record)?;
        if self.cache.get(&key).await?.as_deref() == Some(value.as_str()) {
            return Ok(());
        }
        self.cache
            .set(&key, &value, Some(self.config.cache_ttl))
            .await
    }

    /// Inserts into the durable tier if absent, then warms the fast tier with
    /// whichever record the durable tier holds. Records are never updated.
    pub async fn set_durable(&self, record: &IdHashRecord) -> Result<()> {
        if self.repository.insert_if_absent(record).await? {
            return self.set(record).await;
        }
        match self
            .repository
            .by_provider_id(&record.provider_message_id)
            .await?
        {
            Some(stored) => {
                if stored.internal_hash != record.internal_hash {
                    warn!(
                        gs_id = %record.provider_message_id,
                        stored = %stored.internal_hash,
                        rejected = %record.internal_hash,
                        "idhash record already durable with another hash"
                    );
                } else {
                    debug!(gs_id = %record.provider_message_id, "idhash record already durable");
                }
                self.set(&stored).await
            }
            None => self.set(record).await,
        }
    }

    /// Point lookup for quoted messages: one cache read, then the durable
    /// tier. Never waits.
    pub async fn resolve_quoted(&self, provider_message_id: &str) -> Result<Option<String>> {
        if let Some(record) = self.cached(provider_message_id).await? {
            return Ok(Some(record.internal_hash));
        }
        self.find_hash_by_gs_id(provider_message_id).await
    }

    /// Cache, then one delayed cache retry, then the durable tier.
    pub async fn lookup(&self, provider_message_id: &str) -> Result<Option<ResolvedHash>> {
        let started = Instant::now();
        if let Some(record) = self.cached(provider_message_id).await? {
            return Ok(Some(self.resolved(record, LookupStage::CacheHit, started)));
        }

        tokio::time::sleep(self.config.retry_delay).await;
        let retry_started = Instant::now();
        if let Some(record) = self.cached(provider_message_id).await? {
            return Ok(Some(self.resolved(
                record,
                LookupStage::DelayRetry,
                retry_started,
            )));
        }

        let durable_started = Instant::now();
        if let Some(record) = self.repository.by_provider_id(provider_message_id).await? {
            let key = Self::cache_key(provider_message_id);
            let value = serde_json::to_string(&record)?;
            self.cache
                .set(&key, &value, Some(self.config.cache_ttl))
                .await?;
            return Ok(Some(self.resolved(
                record,
                LookupStage::DurableFallback,
                durable_started,
            )));
        }

        observe(LookupStage::Miss, started);
        debug!(gs_id = %provider_message_id, "idhash lookup missed every tier");
        Ok(None)
    }

    async fn cached(&self, provider_message_id: &str) -> Result<Option<IdHashRecord>> {
        let Some(raw) = self.cache.get(&Self::cache_key(provider_message_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(gs_id = %provider_message_id, error = %err, "discarding malformed idhash cache entry");
                Ok(None)
            }
        }
    }

    fn resolved(&self, record: IdHashRecord, stage: LookupStage, started: Instant) -> ResolvedHash {
        observe(stage, started);
        ResolvedHash { record, stage }
    }

    pub async fn find_hash_by_gs_id(&self, provider_message_id: &str) -> Result<Option<String>> {
        Ok(self
            .repository
            .by_provider_id(provider_message_id)
            .await?
            .map(|record| record.internal_hash))
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<IdHashRecord>> {
        self.repository.by_hash(hash).await
    }

    /// Shortens the fast-tier lifetime of a mapping.
    pub async fn expire(&self, provider_message_id: &str, ttl: Duration) -> Result<()> {
        self.cache
            .expire(&Self::cache_key(provider_message_id), ttl)
            .await
    }
}

fn observe(stage: LookupStage, started: Instant) {
    record_histogram(
        "idhash_lookup_seconds",
        started.elapsed().as_secs_f64(),
        &TelemetryLabels::new("all").with("stage", stage.as_str()),
    );
}

pub type SharedIdHashStore = Arc<IdHashStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use gup_core::{Cache, MemoryCache};

    fn store() -> (IdHashStore, MemoryCache, InMemoryIdHashRepository) {
        store_with_delay(Duration::from_millis(5))
    }

    fn store_with_delay(
        retry_delay: Duration,
    ) -> (IdHashStore, MemoryCache, InMemoryIdHashRepository) {
        let cache = MemoryCache::new();
        let repo = InMemoryIdHashRepository::new();
        let cfg = IdHashConfig {
            retry_delay,
            ..IdHashConfig::default()
        };
        let store = IdHashStore::new(Arc::new(cache.clone()), Arc::new(repo.clone()), cfg);
        (store, cache, repo)
    }

    #[tokio::test]
    async fn cache_hit_skips_durable_tier() {
        let (store, _, repo) = store();
        store.set(&IdHashRecord::new("gs-1", "h1")).await.unwrap();
        let resolved = store.lookup("gs-1").await.unwrap().unwrap();
        assert_eq!(resolved.stage, LookupStage::CacheHit);
        assert_eq!(resolved.record.internal_hash, "h1");
        assert_eq!(repo.reads(), 0);
    }

    #[tokio::test]
    async fn delayed_retry_sees_late_cache_write() {
        let (store, _, _) = store_with_delay(Duration::from_millis(50));
        let writer = store.clone();
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.set(&IdHashRecord::new("gs-2", "h2")).await.unwrap();
        });
        let resolved = store.lookup("gs-2").await.unwrap().unwrap();
        late.await.unwrap();
        assert_eq!(resolved.stage, LookupStage::DelayRetry);
    }

    #[tokio::test]
    async fn durable_fallback_rewarms_cache() {
        let (store, cache, repo) = store();
        repo.insert_if_absent(&IdHashRecord::new("gs-3", "h3"))
            .await
            .unwrap();
        let resolved = store.lookup("gs-3").await.unwrap().unwrap();
        assert_eq!(resolved.stage, LookupStage::DurableFallback);
        assert!(cache.get("idhash:gs-3").await.unwrap().is_some());
        let again = store.lookup("gs-3").await.unwrap().unwrap();
        assert_eq!(again.stage, LookupStage::CacheHit);
    }

    #[tokio::test]
    async fn full_miss_returns_none() {
        let (store, _, repo) = store();
        assert!(store.lookup("nope").await.unwrap().is_none());
        assert_eq!(repo.reads(), 1);
    }

    #[tokio::test]
    async fn set_durable_is_insert_once() {
        let (store, _, _) = store();
        store
            .set_durable(&IdHashRecord::new("gs-4", "h4").with_conversation("c1"))
            .await
            .unwrap();
        store
            .set_durable(&IdHashRecord::new("gs-4", "other"))
            .await
            .unwrap();
        assert_eq!(
            store.find_hash_by_gs_id("gs-4").await.unwrap().as_deref(),
            Some("h4")
        );
        let by_hash = store.find_by_hash("h4").await.unwrap().unwrap();
        assert_eq!(by_hash.conversation_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn conflicting_registration_keeps_both_tiers_on_first_hash() {
        let (store, _, _) = store();
        store
            .set_durable(&IdHashRecord::new("gs-6", "h6"))
            .await
            .unwrap();
        store
            .set_durable(&IdHashRecord::new("gs-6", "other"))
            .await
            .unwrap();
        let resolved = store.lookup("gs-6").await.unwrap().unwrap();
        assert_eq!(resolved.stage, LookupStage::CacheHit);
        assert_eq!(
            Some(resolved.record.internal_hash.clone()),
            store.find_hash_by_gs_id("gs-6").await.unwrap()
        );
        assert_eq!(resolved.record.internal_hash.as_str(), "h6");
    }

    #[tokio::test]
    async fn conflicting_registration_rewarms_evicted_cache_with_stored_record() {
        let (store, cache, repo) = store();
        repo.insert_if_absent(&IdHashRecord::new("gs-7", "h7"))
            .await
            .unwrap();
        store
            .set_durable(&IdHashRecord::new("gs-7", "late"))
            .await
            .unwrap();
        let cached = cache.get("idhash:gs-7").await.unwrap().unwrap();
        assert!(cached.contains("\"h7\""));
    }

    #[tokio::test]
    async fn quoted_resolution_never_waits() {
        let (store, _, repo) = store_with_delay(Duration::from_secs(30));
        repo.insert_if_absent(&IdHashRecord::new("gs-8", "h8"))
            .await
            .unwrap();
        let started = Instant::now();
        assert_eq!(store.resolve_quoted("gs-8").await.unwrap().as_deref(), Some("h8"));
        assert!(store.resolve_quoted("unknown").await.unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn expire_shortens_cache_entry() {
        let (store, cache, _) = store();
        store.set(&IdHashRecord::new("gs-5", "h5")).await.unwrap();
        store
            .expire("gs-5", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(cache.ttl("idhash:gs-5").unwrap() <= Duration::from_secs(2));
    }
}
