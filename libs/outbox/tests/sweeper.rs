use std::{sync::Arc, time::Duration};

use gup_bus::InMemoryBusClient;
use gup_outbox::{InMemoryOutboxStore, Outbox, OutboxConfig, OutboxStore};
use serde_json::json;

fn outbox(bus: &InMemoryBusClient, store: &InMemoryOutboxStore, enabled: bool) -> Outbox {
    Outbox::new(
        Arc::new(bus.clone()),
        Arc::new(store.clone()),
        OutboxConfig {
            enabled,
            retry_base: Duration::ZERO,
            sweep_interval: Duration::from_millis(10),
            ..OutboxConfig::default()
        },
    )
}

#[tokio::test]
async fn published_entries_are_removed() {
    let bus = InMemoryBusClient::new();
    let store = InMemoryOutboxStore::new();
    let outbox = outbox(&bus, &store, true);

    outbox
        .publish("tok", "gupshup.ack.tok", json!({"ack": 1}))
        .await
        .unwrap();

    assert!(store.is_empty().await);
    assert_eq!(
        bus.take_published().await,
        vec![("gupshup.ack.tok".to_string(), json!({"ack": 1}))]
    );
}

#[tokio::test]
async fn failed_publish_stays_pending_until_sweep() {
    let bus = InMemoryBusClient::new();
    let store = InMemoryOutboxStore::new();
    let outbox = outbox(&bus, &store, true);

    bus.set_failing(true);
    outbox
        .publish("tok", "gupshup.ack.tok", json!({"ack": 2}))
        .await
        .unwrap();

    let pending = store.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].last_error.as_deref(), Some("bus unavailable"));

    let report = outbox.sweep_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(store.pending().await.unwrap()[0].attempts, 2);

    bus.set_failing(false);
    let report = outbox.sweep_once().await.unwrap();
    assert_eq!(report.published, 1);
    assert!(store.is_empty().await);
    assert_eq!(bus.take_published().await.len(), 1);
}

#[tokio::test]
async fn background_sweeper_drains_store() {
    let bus = InMemoryBusClient::new();
    let store = InMemoryOutboxStore::new();
    let outbox = outbox(&bus, &store, true);

    bus.set_failing(true);
    outbox
        .publish("tok", "gupshup.ack.tok", json!({"ack": 3}))
        .await
        .unwrap();
    bus.set_failing(false);

    let sweeper = outbox.spawn_sweeper();
    for _ in 0..50 {
        if store.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sweeper.abort();

    assert!(store.is_empty().await);
    assert_eq!(bus.take_published().await.len(), 1);
}

#[tokio::test]
async fn disabled_outbox_drops_failed_publishes() {
    let bus = InMemoryBusClient::new();
    let store = InMemoryOutboxStore::new();
    let outbox = outbox(&bus, &store, false);

    bus.set_failing(true);
    outbox
        .publish("tok", "gupshup.ack.tok", json!({"ack": 1}))
        .await
        .unwrap();

    assert!(store.is_empty().await);
    assert!(bus.take_published().await.is_empty());
}
