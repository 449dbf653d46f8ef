mod common;

use std::time::Duration;

use common::*;
use gup_core::{ActivityKind, ActivityRequest, AckType, Cache, ConversationRef};
use gup_idhash::{IdHashRecord, IdHashRepository, LookupStage};
use gup_outbox::OutboxStore;
use gup_pipeline::{AckOutcome, DispatchOutcome, missing_received_key, process_error};
use serde_json::json;

/// Seeds an outbound message `hash` sent as provider id `gs_id`.
async fn outbound(h: &Harness, gs_id: &str, hash: &str) -> ConversationRef {
    let conversation = ConversationRef {
        id: "conv-out".into(),
        channel_token: CHANNEL.into(),
        members: vec!["5511987654321".into()],
    };
    h.conversations.insert(conversation.clone(), WORKSPACE);
    h.activities.insert(
        ActivityRequest::new(hash, ActivityKind::Text, "agent", 1),
        conversation.clone(),
    );
    h.idhash
        .set(&IdHashRecord::new(gs_id, hash).with_conversation("conv-out"))
        .await
        .unwrap();
    conversation
}

async fn acks(h: &Harness) -> Vec<i64> {
    h.ack_updates()
        .await
        .iter()
        .map(|update| update["data"]["ack"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn sent_delivered_read_publish_in_order() {
    let h = Harness::new();
    let conversation = outbound(&h, "gs-1", "hash-1").await;

    for status in ["sent", "delivered", "read"] {
        h.dispatcher
            .dispatch(CHANNEL, &status_event("gs-1", status, None))
            .await
            .unwrap();
    }

    let updates = h.ack_updates().await;
    assert_eq!(updates.len(), 3);
    assert_eq!(acks(&h).await, vec![1, 2, 3]);
    for update in &updates {
        assert_eq!(update["data"]["hash"], json!(["hash-1"]));
        assert_eq!(update["data"]["workspaceId"], WORKSPACE);
        assert_eq!(update["data"]["conversation"]["id"], conversation.id);
        assert_eq!(update["dataType"], "WHATSWEB_MESSAGE_ACK");
        assert_eq!(update["type"], "WHATSWEB_MESSAGE_ACK");
    }
    let published = h.bus.published().await;
    assert!(published.iter().all(|(subject, _)| subject == &format!("gupshup.ack.{CHANNEL}")));

    let stored = h.activities.get("hash-1").unwrap();
    assert_eq!(stored.ack, Some(AckType::Read));
    assert_eq!(h.activities.acks().len(), 3);
}

#[tokio::test]
async fn read_before_delivered_is_not_clamped() {
    let h = Harness::new();
    outbound(&h, "gs-2", "hash-2").await;

    for status in ["sent", "read", "delivered"] {
        h.dispatcher
            .dispatch(CHANNEL, &status_event("gs-2", status, None))
            .await
            .unwrap();
    }
    assert_eq!(acks(&h).await, vec![1, 3, 2]);
    assert_eq!(
        h.activities.get("hash-2").unwrap().ack,
        Some(AckType::DeliveryAck)
    );
}

#[test]
fn error_table_maps_every_code() {
    let table = [
        (500, -500),
        (503, -500),
        (1002, -1002),
        (472, -472),
        (130472, -472),
        (1013, -1013),
        (4003, -4003),
        (1001, -1001),
        (131026, -131026),
        (131049, -131049),
        (133010, -133010),
        (9999, -9999),
    ];
    for (code, expected) in table {
        assert_eq!(process_error(code).value(), expected, "code {code}");
    }
    assert!(process_error(9999).is_unmapped());
}

#[tokio::test]
async fn invalid_number_codes_mark_destination_once() {
    for code in [1002, 1013, 131026] {
        let h = Harness::new();
        outbound(&h, "gs-inv", "hash-inv").await;
        let outcome = h
            .dispatcher
            .dispatch(CHANNEL, &status_event("gs-inv", "failed", Some(code)))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Ack(AckOutcome::Published { ack, .. }) if ack.value() == -code
        ));
        assert_eq!(h.conversations.calls().mark_invalid, 1, "code {code}");
        let stored = h.conversations.get("conv-out").unwrap();
        assert!(stored.invalid_destination);
        assert_eq!(stored.invalid_phone.as_deref(), Some("5511987654321"));
        assert_eq!(acks(&h).await, vec![-code]);
    }
}

#[tokio::test]
async fn other_error_codes_leave_destination_alone() {
    let h = Harness::new();
    outbound(&h, "gs-e", "hash-e").await;
    h.dispatcher
        .dispatch(CHANNEL, &status_event("gs-e", "failed", Some(131049)))
        .await
        .unwrap();
    assert_eq!(h.conversations.calls().mark_invalid, 0);
    assert!(h.alerts.codes().is_empty());
    assert_eq!(acks(&h).await, vec![-131049]);
}

#[tokio::test]
async fn unmapped_code_raises_operator_alert() {
    let h = Harness::new();
    outbound(&h, "gs-u", "hash-u").await;
    h.dispatcher
        .dispatch(CHANNEL, &status_event("gs-u", "failed", Some(470)))
        .await
        .unwrap();
    assert_eq!(h.alerts.codes(), vec![470]);
    assert_eq!(acks(&h).await, vec![-470]);
}

#[tokio::test]
async fn sent_clears_missing_received_watchdog() {
    let h = Harness::new();
    outbound(&h, "gs-w", "hash-w").await;
    let key = missing_received_key("5511987654321");
    h.cache.set(&key, "1", None).await.unwrap();

    h.dispatcher
        .dispatch(CHANNEL, &status_event("gs-w", "sent", None))
        .await
        .unwrap();
    assert!(h.cache.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn read_shortens_cached_mapping() {
    let h = Harness::new();
    outbound(&h, "gs-r", "hash-r").await;
    assert!(h.cache.ttl("idhash:gs-r").unwrap() > Duration::from_secs(60));

    h.dispatcher
        .dispatch(CHANNEL, &status_event("gs-r", "read", None))
        .await
        .unwrap();
    assert!(h.cache.ttl("idhash:gs-r").unwrap() <= Duration::from_secs(10));
}

#[tokio::test]
async fn unknown_message_ack_is_dropped() {
    let h = Harness::new();
    let outcome = h
        .dispatcher
        .dispatch(CHANNEL, &status_event("gs-missing", "delivered", None))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Ack(AckOutcome::Unresolved));
    assert!(h.ack_updates().await.is_empty());
    assert!(h.activities.acks().is_empty());
}

#[tokio::test]
async fn enqueued_and_other_statuses_are_ignored() {
    let h = Harness::new();
    outbound(&h, "gs-q", "hash-q").await;
    for status in ["enqueued", "deleted"] {
        let outcome = h
            .dispatcher
            .dispatch(CHANNEL, &status_event("gs-q", status, None))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Ack(AckOutcome::Ignored));
    }
    assert!(h.ack_updates().await.is_empty());
}

#[tokio::test]
async fn durable_tier_resolves_after_cache_expiry() {
    let h = Harness::new();
    h.repository
        .insert_if_absent(&IdHashRecord::new("gs-d", "hash-d").with_workspace(WORKSPACE))
        .await
        .unwrap();

    let outcome = h
        .dispatcher
        .dispatch(CHANNEL, &status_event("gs-d", "delivered", None))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Ack(AckOutcome::Published {
            ack: AckType::DeliveryAck,
            hash: "hash-d".into(),
            stage: LookupStage::DurableFallback,
        })
    );
    // No activity was recorded for this hash, so the update carries no conversation.
    let updates = h.ack_updates().await;
    assert!(updates[0]["data"]["conversation"].is_null());

    let again = h
        .dispatcher
        .dispatch(CHANNEL, &status_event("gs-d", "read", None))
        .await
        .unwrap();
    assert!(matches!(
        again,
        DispatchOutcome::Ack(AckOutcome::Published { stage: LookupStage::CacheHit, .. })
    ));
}

#[tokio::test]
async fn bus_outage_keeps_ack_in_outbox() {
    let h = Harness::new();
    outbound(&h, "gs-o", "hash-o").await;
    h.bus.set_failing(true);

    let outcome = h
        .dispatcher
        .dispatch(CHANNEL, &status_event("gs-o", "delivered", None))
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Ack(AckOutcome::Published { .. })));
    let pending = h.outbox_store.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload["data"]["ack"], 2);

    h.bus.set_failing(false);
    let outbox = gup_outbox::Outbox::new(
        std::sync::Arc::new(h.bus.clone()),
        std::sync::Arc::new(h.outbox_store.clone()),
        gup_outbox::OutboxConfig {
            retry_base: Duration::ZERO,
            ..gup_outbox::OutboxConfig::default()
        },
    );
    assert_eq!(outbox.sweep_once().await.unwrap().published, 1);
    assert_eq!(acks(&h).await, vec![2]);
}

#[tokio::test]
async fn invalid_number_without_conversation_is_not_marked() {
    let h = Harness::new();
    h.idhash
        .set(&IdHashRecord::new("gs-nc", "hash-nc"))
        .await
        .unwrap();
    h.dispatcher
        .dispatch(CHANNEL, &status_event("gs-nc", "failed", Some(1002)))
        .await
        .unwrap();
    assert_eq!(h.conversations.calls().mark_invalid, 0);
    assert_eq!(acks(&h).await, vec![-1002]);
    assert_eq!(h.conversations.calls().find_active, 0);
}
