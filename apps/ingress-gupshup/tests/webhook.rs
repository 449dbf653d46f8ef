use std::{io::Write, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};
use bytes::Bytes;
use gup_bus::InMemoryBusClient;
use gup_core::{
    MemoryCache,
    memory::{MemoryActivityStore, MemoryConversationStore, MemoryTemplateSink, MemoryUploader},
};
use gup_idhash::{IdHashConfig, IdHashStore, InMemoryIdHashRepository};
use gup_ingress_gupshup::{AppState, channels::load_channels, router};
use gup_outbox::{InMemoryOutboxStore, Outbox, OutboxConfig};
use gup_pipeline::{
    Collaborators, Dispatcher, FetchedMedia, LogAlertSink, LogErrorSink, MediaError,
    MediaSource, PipelineConfig,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

const CHANNELS: &str = r#"
channels:
  - token: open
    workspace_id: ws-open
  - token: receptive
    workspace_id: ws-receptive
    block_inbound_attendance: true
"#;

/// Every media URL answers 403.
struct ForbiddenMedia;

#[async_trait]
impl MediaSource for ForbiddenMedia {
    async fn fetch(
        &self,
        _url: &str,
        _headers: HeaderMap,
        _timeout: Duration,
    ) -> Result<FetchedMedia, MediaError> {
        Ok(FetchedMedia {
            status: StatusCode::FORBIDDEN,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"expired"),
        })
    }
}

struct TestApp {
    app: Router,
    conversations: Arc<MemoryConversationStore>,
    bus: InMemoryBusClient,
}

fn test_app() -> TestApp {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CHANNELS.as_bytes()).unwrap();
    let channels = load_channels(file.path()).unwrap();

    let activities = Arc::new(MemoryActivityStore::new());
    let conversations = Arc::new(MemoryConversationStore::new(activities.clone()));
    let cache = Arc::new(MemoryCache::new());
    let bus = InMemoryBusClient::new();
    let idhash = Arc::new(IdHashStore::new(
        cache.clone(),
        Arc::new(InMemoryIdHashRepository::new()),
        IdHashConfig {
            retry_delay: Duration::from_millis(1),
            ..IdHashConfig::default()
        },
    ));
    let dispatcher = Dispatcher::new(
        Collaborators {
            conversations: conversations.clone(),
            activities,
            uploader: Arc::new(MemoryUploader::new()),
            channels: Arc::new(channels),
            templates: Arc::new(MemoryTemplateSink::new()),
            cache,
            media: Arc::new(ForbiddenMedia),
            idhash,
            outbox: Outbox::new(
                Arc::new(bus.clone()),
                Arc::new(InMemoryOutboxStore::new()),
                OutboxConfig::default(),
            ),
            errors: Arc::new(LogErrorSink),
            alerts: Arc::new(LogAlertSink),
        },
        PipelineConfig {
            throttle_step: Duration::ZERO,
            ..PipelineConfig::default()
        },
    );
    TestApp {
        app: router(AppState { dispatcher }),
        conversations,
        bus,
    }
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn inbound(id: &str, kind: &str, inner: Value) -> String {
    json!({
        "app": "demo",
        "timestamp": 1_700_000_000_000i64,
        "type": "message",
        "payload": {
            "id": id,
            "source": "5511987654321",
            "type": kind,
            "payload": inner,
            "sender": {"phone": "5511987654321", "name": "Ana"}
        }
    })
    .to_string()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn text_message_is_accepted_and_retry_is_deduplicated() {
    let t = test_app();
    let body = inbound("wamid-1", "text", json!({"text": "oi"}));

    let res = t
        .app
        .clone()
        .oneshot(post("/ingress/gupshup/open", body.clone()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));

    let res = t
        .app
        .oneshot(post("/ingress/gupshup/open", body))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(t.conversations.len(), 1);
}

#[tokio::test]
async fn blocked_and_unknown_channels_answer_ok() {
    let t = test_app();
    for channel in ["receptive", "nobody"] {
        let res = t
            .app
            .clone()
            .oneshot(post(
                &format!("/ingress/gupshup/{channel}"),
                inbound("wamid-b", "text", json!({"text": "oi"})),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "channel {channel}");
    }
    assert!(t.conversations.is_empty());
}

#[tokio::test]
async fn media_failure_answers_500_for_provider_retry() {
    let t = test_app();
    let res = t
        .app
        .oneshot(post(
            "/ingress/gupshup/open",
            inbound(
                "wamid-img",
                "image",
                json!({"url": "https://media.local/img", "caption": "foto"}),
            ),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(res).await;
    assert_eq!(body["code"], "E_MEDIA_STATUS");
    assert!(t.conversations.is_empty());
}

#[tokio::test]
async fn undecodable_body_is_rejected() {
    let t = test_app();
    let res = t
        .app
        .oneshot(post("/ingress/gupshup/open", "{not json"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "E_BAD_REQUEST");
}

#[tokio::test]
async fn healthz_echoes_request_id() {
    let t = test_app();
    let req = Request::builder()
        .uri("/healthz")
        .header("x-request-id", "rid-42")
        .body(Body::empty())
        .unwrap();
    let res = t.app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["x-request-id"], "rid-42");
}

#[tokio::test]
async fn registered_outbound_message_gets_ack_updates() {
    let t = test_app();
    let record = json!({
        "providerMessageId": "gs-out-1",
        "internalHash": "hash-out-1",
        "workspaceId": "ws-open"
    });
    let res = t
        .app
        .clone()
        .oneshot(post("/idhash/open", record.to_string()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let event = json!({
        "app": "demo",
        "timestamp": 1_700_000_002_000i64,
        "type": "message-event",
        "payload": {
            "id": "wamid-out-1",
            "gsId": "gs-out-1",
            "type": "delivered",
            "destination": "5511987654321",
            "payload": {"ts": 1_700_000_002i64}
        }
    });
    let res = t
        .app
        .oneshot(post("/ingress/gupshup/open", event.to_string()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let published = t.bus.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "gupshup.ack.open");
    assert_eq!(published[0].1["data"]["ack"], 2);
    assert_eq!(published[0].1["data"]["hash"], json!(["hash-out-1"]));
}

#[tokio::test]
async fn idhash_registration_requires_ids() {
    let t = test_app();
    let res = t
        .app
        .oneshot(post(
            "/idhash/open",
            json!({"providerMessageId": " ", "internalHash": "h"}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
