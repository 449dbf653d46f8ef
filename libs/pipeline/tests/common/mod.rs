#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use gup_bus::InMemoryBusClient;
use gup_core::{
    AckEvent, ChannelConfig, ConversationRef, ConversationStore, InboundEnvelope, MemoryCache,
    NewConversation, Provisioned, SessionUpdate, SharedConversationStore,
    memory::{
        MemoryActivityStore, MemoryChannelConfigStore, MemoryConversationStore,
        MemoryTemplateSink, MemoryUploader,
    },
};
use gup_idhash::{IdHashConfig, IdHashStore, InMemoryIdHashRepository};
use gup_outbox::{InMemoryOutboxStore, Outbox, OutboxConfig};
use gup_pipeline::{
    AlertSink, BusErrorSink, Collaborators, Dispatcher, FetchedMedia, MediaError, MediaSource,
    PipelineConfig,
};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::{Value, json};

pub const CHANNEL: &str = "chan-token";
pub const WORKSPACE: &str = "ws-1";

/// Serves canned responses keyed by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct StaticMediaSource {
    responses: Mutex<HashMap<String, FetchedMedia>>,
    calls: AtomicUsize,
}

impl StaticMediaSource {
    pub fn serve(&self, url: &str, headers: &[(&'static str, &str)], body: &'static [u8]) {
        self.serve_status(url, StatusCode::OK, headers, body);
    }

    pub fn serve_status(
        &self,
        url: &str,
        status: StatusCode,
        headers: &[(&'static str, &str)],
        body: &'static [u8],
    ) {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        self.responses.lock().unwrap().insert(
            url.to_string(),
            FetchedMedia {
                status,
                headers: map,
                body: Bytes::from_static(body),
            },
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn fetch(
        &self,
        url: &str,
        _headers: HeaderMap,
        _timeout: Duration,
    ) -> Result<FetchedMedia, MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(FetchedMedia {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"not found"),
            }))
    }
}

/// Hides existing conversations from lookups, as if another request created
/// them between our lookup and our create.
pub struct RacingConversations {
    inner: Arc<MemoryConversationStore>,
}

#[async_trait]
impl ConversationStore for RacingConversations {
    async fn find_active(&self, _: &str, _: &str) -> anyhow::Result<Option<ConversationRef>> {
        Ok(None)
    }

    async fn find_by_members(
        &self,
        _: &str,
        _: &[String],
    ) -> anyhow::Result<Option<ConversationRef>> {
        Ok(None)
    }

    async fn get_or_create(&self, request: NewConversation) -> anyhow::Result<Provisioned> {
        self.inner.get_or_create(request).await
    }

    async fn update_session(&self, id: &str, update: SessionUpdate) -> anyhow::Result<()> {
        self.inner.update_session(id, update).await
    }

    async fn mark_invalid_destination(&self, id: &str, phone: Option<&str>) -> anyhow::Result<()> {
        self.inner.mark_invalid_destination(id, phone).await
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    codes: Mutex<Vec<i64>>,
}

impl RecordingAlerts {
    pub fn codes(&self) -> Vec<i64> {
        self.codes.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn unmapped_error_code(&self, _channel: &str, code: i64, _event: &AckEvent) {
        self.codes.lock().unwrap().push(code);
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub activities: Arc<MemoryActivityStore>,
    pub conversations: Arc<MemoryConversationStore>,
    pub uploader: Arc<MemoryUploader>,
    pub channels: Arc<MemoryChannelConfigStore>,
    pub templates: Arc<MemoryTemplateSink>,
    pub cache: MemoryCache,
    pub media: Arc<StaticMediaSource>,
    pub bus: InMemoryBusClient,
    pub outbox_store: InMemoryOutboxStore,
    pub repository: InMemoryIdHashRepository,
    pub idhash: Arc<IdHashStore>,
    pub alerts: Arc<RecordingAlerts>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_channel(ChannelConfig::new(CHANNEL, WORKSPACE))
    }

    pub fn with_channel(channel: ChannelConfig) -> Self {
        Self::build(channel, false, Duration::from_millis(5))
    }

    pub fn racing() -> Self {
        Self::build(ChannelConfig::new(CHANNEL, WORKSPACE), true, Duration::from_millis(5))
    }

    /// Harness whose idhash lookups wait `retry_delay` between cache reads.
    pub fn with_retry_delay(retry_delay: Duration) -> Self {
        Self::build(ChannelConfig::new(CHANNEL, WORKSPACE), false, retry_delay)
    }

    fn build(channel: ChannelConfig, racing: bool, retry_delay: Duration) -> Self {
        let activities = Arc::new(MemoryActivityStore::new());
        let conversations = Arc::new(MemoryConversationStore::new(activities.clone()));
        let uploader = Arc::new(MemoryUploader::new());
        let channels = Arc::new(MemoryChannelConfigStore::new([channel]));
        let templates = Arc::new(MemoryTemplateSink::new());
        let cache = MemoryCache::new();
        let media = Arc::new(StaticMediaSource::default());
        let bus = InMemoryBusClient::new();
        let outbox_store = InMemoryOutboxStore::new();
        let repository = InMemoryIdHashRepository::new();
        let alerts = Arc::new(RecordingAlerts::default());

        let idhash = Arc::new(IdHashStore::new(
            Arc::new(cache.clone()),
            Arc::new(repository.clone()),
            IdHashConfig {
                retry_delay,
                ..IdHashConfig::default()
            },
        ));
        let outbox = Outbox::new(
            Arc::new(bus.clone()),
            Arc::new(outbox_store.clone()),
            OutboxConfig {
                retry_base: Duration::ZERO,
                ..OutboxConfig::default()
            },
        );
        let config = PipelineConfig {
            throttle_step: Duration::ZERO,
            ..PipelineConfig::default()
        };
        let shared_conversations: SharedConversationStore = if racing {
            Arc::new(RacingConversations {
                inner: conversations.clone(),
            })
        } else {
            conversations.clone()
        };
        let dispatcher = Dispatcher::new(
            Collaborators {
                conversations: shared_conversations,
                activities: activities.clone(),
                uploader: uploader.clone(),
                channels: channels.clone(),
                templates: templates.clone(),
                cache: Arc::new(cache.clone()),
                media: media.clone(),
                idhash: idhash.clone(),
                outbox,
                errors: Arc::new(BusErrorSink::new(Arc::new(bus.clone()))),
                alerts: alerts.clone(),
            },
            config,
        );

        Self {
            dispatcher,
            activities,
            conversations,
            uploader,
            channels,
            templates,
            cache,
            media,
            bus,
            outbox_store,
            repository,
            idhash,
            alerts,
        }
    }

    /// Published messages on ack subjects, in order.
    pub async fn ack_updates(&self) -> Vec<Value> {
        self.bus
            .published()
            .await
            .into_iter()
            .filter(|(subject, _)| subject.starts_with("gupshup.ack."))
            .map(|(_, payload)| payload)
            .collect()
    }

    /// Published error records, in order.
    pub async fn error_records(&self) -> Vec<(String, Value)> {
        self.bus
            .published()
            .await
            .into_iter()
            .filter(|(subject, _)| subject.starts_with("gupshup.dlq."))
            .collect()
    }
}

pub fn envelope(value: Value) -> InboundEnvelope {
    serde_json::from_value(value).unwrap()
}

pub fn message(id: &str, sender: &str, kind: &str, inner: Value) -> InboundEnvelope {
    envelope(json!({
        "app": "demo",
        "timestamp": 1_700_000_000_000i64,
        "type": "message",
        "payload": {
            "id": id,
            "source": sender,
            "type": kind,
            "payload": inner,
            "sender": {"phone": sender, "name": "Ana"}
        }
    }))
}

pub fn text(id: &str, sender: &str, body: &str) -> InboundEnvelope {
    message(id, sender, "text", json!({"text": body}))
}

pub fn status_event(gs_id: &str, status: &str, code: Option<i64>) -> InboundEnvelope {
    let mut inner = json!({"ts": 1_700_000_000i64});
    if let Some(code) = code {
        inner["code"] = json!(code);
        inner["reason"] = json!("provider said no");
    }
    envelope(json!({
        "app": "demo",
        "timestamp": 1_700_000_001_000i64,
        "type": "message-event",
        "payload": {
            "id": format!("wamid-{gs_id}"),
            "gsId": gs_id,
            "type": status,
            "destination": "5511987654321",
            "payload": inner
        }
    }))
}
