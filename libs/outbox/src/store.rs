use std::{sync::Arc, time::Duration as StdDuration};

use anyhow::{Context, Result};
use async_nats::jetstream::{Context as JsContext, context::KeyValueErrorKind, kv};
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::sync::RwLock;
use tracing::warn;

use crate::OutboxEntry;

/// Persistence for entries that have not been published yet.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts or replaces the entry with the same id.
    async fn put(&self, entry: &OutboxEntry) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
    /// Pending entries, oldest first.
    async fn pending(&self) -> Result<Vec<OutboxEntry>>;
}

pub type SharedOutboxStore = Arc<dyn OutboxStore>;

#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    inner: Arc<RwLock<Vec<OutboxEntry>>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn put(&self, entry: &OutboxEntry) -> Result<()> {
        let mut guard = self.inner.write().await;
        match guard.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => guard.push(entry.clone()),
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.inner.write().await.retain(|entry| entry.id != id);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<OutboxEntry>> {
        Ok(self.inner.read().await.clone())
    }
}

/// JetStream KV outbox, one key per entry id.
pub struct NatsKvOutboxStore {
    bucket: kv::Store,
}

impl NatsKvOutboxStore {
    pub async fn new(js: &JsContext, namespace: &str) -> Result<Self> {
        let bucket = match js.get_key_value(namespace).await {
            Ok(store) => store,
            Err(err) if err.kind() == KeyValueErrorKind::GetBucket => js
                .create_key_value(kv::Config {
                    bucket: namespace.to_string(),
                    history: 1,
                    max_age: StdDuration::from_secs(0),
                    ..Default::default()
                })
                .await
                .with_context(|| format!("create JetStream KV bucket {namespace}"))?,
            Err(err) => anyhow::bail!("outbox kv init failed: {err}"),
        };
        Ok(Self { bucket })
    }
}

#[async_trait]
impl OutboxStore for NatsKvOutboxStore {
    async fn put(&self, entry: &OutboxEntry) -> Result<()> {
        let payload = serde_json::to_vec(entry)?;
        self.bucket
            .put(entry.id.as_str(), payload.into())
            .await
            .with_context(|| format!("store outbox entry {}", entry.id))?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.bucket
            .purge(id)
            .await
            .with_context(|| format!("purge outbox entry {id}"))?;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<OutboxEntry>> {
        let keys: Vec<String> = self
            .bucket
            .keys()
            .await
            .context("list outbox keys")?
            .try_collect()
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(bytes) = self.bucket.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<OutboxEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(key = %key, error = %err, "skipping malformed outbox entry"),
            }
        }
        entries.sort_by_key(|entry| entry.created_at_ms);
        Ok(entries)
    }
}
