use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration as StdDuration,
};

use anyhow::{Context, Result};
use async_nats::jetstream::{
    Context as JsContext,
    context::KeyValueErrorKind,
    kv::{self, CreateErrorKind},
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::IdHashRecord;

/// Durable tier. Records are written once and never updated.
#[async_trait]
pub trait IdHashRepository: Send + Sync {
    /// Returns `Ok(true)` when the record was stored, `Ok(false)` when a record
    /// for the provider id already existed.
    async fn insert_if_absent(&self, record: &IdHashRecord) -> Result<bool>;
    async fn by_provider_id(&self, provider_message_id: &str) -> Result<Option<IdHashRecord>>;
    async fn by_hash(&self, hash: &str) -> Result<Option<IdHashRecord>>;
}

pub type SharedIdHashRepository = Arc<dyn IdHashRepository>;

#[derive(Default)]
struct Tables {
    by_provider_id: HashMap<String, IdHashRecord>,
    by_hash: HashMap<String, IdHashRecord>,
}

/// Process-local repository used in tests or when JetStream is unavailable.
#[derive(Clone, Default)]
pub struct InMemoryIdHashRepository {
    inner: Arc<RwLock<Tables>>,
    reads: Arc<AtomicUsize>,
}

impl InMemoryIdHashRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of point reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_provider_id.len()
    }
}

#[async_trait]
impl IdHashRepository for InMemoryIdHashRepository {
    async fn insert_if_absent(&self, record: &IdHashRecord) -> Result<bool> {
        let mut guard = self.inner.write().await;
        if guard
            .by_provider_id
            .contains_key(&record.provider_message_id)
        {
            return Ok(false);
        }
        guard
            .by_provider_id
            .insert(record.provider_message_id.clone(), record.clone());
        guard
            .by_hash
            .entry(record.internal_hash.clone())
            .or_insert_with(|| record.clone());
        Ok(true)
    }

    async fn by_provider_id(&self, provider_message_id: &str) -> Result<Option<IdHashRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let guard = self.inner.read().await;
        Ok(guard.by_provider_id.get(provider_message_id).cloned())
    }

    async fn by_hash(&self, hash: &str) -> Result<Option<IdHashRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let guard = self.inner.read().await;
        Ok(guard.by_hash.get(hash).cloned())
    }
}

/// JetStream KV repository. One bucket, keyed `gs.<id>` and `hash.<hash>`.
pub struct NatsKvIdHashRepository {
    bucket: kv::Store,
}

impl NatsKvIdHashRepository {
    /// Ensures a JetStream bucket exists (or creates it) and returns a repository handle.
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
            Err(err) => anyhow::bail!("idhash kv init failed: {err}"),
        };
        Ok(Self { bucket })
    }

    async fn create(&self, key: &str, record: &IdHashRecord) -> Result<bool> {
        let payload = serde_json::to_vec(record)?;
        match self.bucket.create(key, payload.into()).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == CreateErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(anyhow::anyhow!(err).context(format!("create idhash key {key}"))),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<IdHashRecord>> {
        let entry = self
            .bucket
            .get(key)
            .await
            .with_context(|| format!("read idhash key {key}"))?;
        match entry {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl IdHashRepository for NatsKvIdHashRepository {
    #[instrument(name = "idhash.insert", skip(self, record), fields(gs_id = %record.provider_message_id))]
    async fn insert_if_absent(&self, record: &IdHashRecord) -> Result<bool> {
        let inserted = self
            .create(&kv_key("gs", &record.provider_message_id), record)
            .await?;
        if inserted && !self
            .create(&kv_key("hash", &record.internal_hash), record)
            .await?
        {
            debug!(hash = %record.internal_hash, "hash already mapped to another provider id");
        }
        Ok(inserted)
    }

    async fn by_provider_id(&self, provider_message_id: &str) -> Result<Option<IdHashRecord>> {
        self.read(&kv_key("gs", provider_message_id)).await
    }

    async fn by_hash(&self, hash: &str) -> Result<Option<IdHashRecord>> {
        self.read(&kv_key("hash", hash)).await
    }
}

/// Characters outside `[-/_=a-zA-Z0-9]` become `_` so ids never add KV key tokens.
fn kv_key(prefix: &str, raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | '/') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}.{cleaned}")
}
