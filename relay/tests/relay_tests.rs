//! Relay behavior against the in-memory outbox and bus.

#![allow(clippy::unwrap_used)]

use chrono::{Duration, Utc};
use commerce_core::config::RelayConfig;
use commerce_core::event::topics;
use commerce_core::ids::EventId;
use commerce_core::store::{NewOutboxEvent, OutboxStatus, OutboxStore};
use commerce_relay::OutboxRelay;
use commerce_testing::{InMemoryCommerceStore, InMemoryStreamingBus};
use std::sync::Arc;

fn config(batch_size: u32) -> RelayConfig {
    RelayConfig {
        batch_size,
        poll_interval: std::time::Duration::from_millis(10),
        claim_rows: false,
    }
}

fn outbox_event(aggregate_id: &str, version: i64, offset_ms: i64) -> NewOutboxEvent {
    NewOutboxEvent {
        event_id: EventId::new(),
        event_type: "OrderCreated".into(),
        aggregate_id: aggregate_id.to_owned(),
        aggregate_type: "Order".into(),
        version,
        topic: topics::ORDER_EVENTS.into(),
        partition_key: aggregate_id.to_owned(),
        payload: serde_json::json!({"aggregateId": aggregate_id, "version": version}),
        created_at: Utc::now() + Duration::milliseconds(offset_ms),
    }
}

#[tokio::test]
async fn publishes_pending_rows_in_created_at_order() {
    let store = Arc::new(InMemoryCommerceStore::new());
    let bus = Arc::new(InMemoryStreamingBus::new());
    store.seed_outbox_event(outbox_event("2", 1, 5)).await;
    store.seed_outbox_event(outbox_event("1", 1, 0)).await;
    store.seed_outbox_event(outbox_event("1", 2, 10)).await;

    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&bus), config(100));
    let stats = relay.relay_batch().await.unwrap();

    assert_eq!(stats.published, 3);
    assert_eq!(stats.failed, 0);

    let published = bus.published_to(topics::ORDER_EVENTS).await;
    assert_eq!(published.len(), 3);
    // created_at ascending: aggregate 1 v1, aggregate 2 v1, aggregate 1 v2
    assert_eq!(published[0].key, "1");
    assert_eq!(published[1].key, "2");
    assert_eq!(published[2].key, "1");

    for event in store.outbox_events().await {
        assert_eq!(event.status, OutboxStatus::Published);
        assert!(event.published_at.is_some());
    }
}

#[tokio::test]
async fn batch_size_bounds_each_pass() {
    let store = Arc::new(InMemoryCommerceStore::new());
    let bus = Arc::new(InMemoryStreamingBus::new());
    for i in 0..5 {
        store.seed_outbox_event(outbox_event("1", i + 1, i)).await;
    }

    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&bus), config(2));
    assert_eq!(relay.relay_batch().await.unwrap().published, 2);
    assert_eq!(relay.relay_batch().await.unwrap().published, 2);
    assert_eq!(relay.relay_batch().await.unwrap().published, 1);
    assert_eq!(relay.relay_batch().await.unwrap().published, 0);
}

#[tokio::test]
async fn rejected_publish_marks_failed_and_is_not_retried() {
    let store = Arc::new(InMemoryCommerceStore::new());
    let bus = Arc::new(InMemoryStreamingBus::new());
    bus.fail_topic(topics::ORDER_EVENTS, true).await;
    store.seed_outbox_event(outbox_event("1", 1, 0)).await;

    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&bus), config(100));
    let stats = relay.relay_batch().await.unwrap();
    assert_eq!(stats.failed, 1);

    let events = store.outbox_events().await;
    assert_eq!(events[0].status, OutboxStatus::Failed);

    // The bus recovers, but FAILED rows stay put until an operator resets them.
    bus.fail_topic(topics::ORDER_EVENTS, false).await;
    let stats = relay.relay_batch().await.unwrap();
    assert_eq!(stats.published, 0);
    assert!(bus.published().await.is_empty());
}

#[tokio::test]
async fn one_failure_does_not_stop_the_batch() {
    let store = Arc::new(InMemoryCommerceStore::new());
    let bus = Arc::new(InMemoryStreamingBus::new());
    bus.fail_topic(topics::LIKE_EVENTS, true).await;

    let mut like = outbox_event("7", 1, 0);
    like.topic = topics::LIKE_EVENTS.into();
    store.seed_outbox_event(like).await;
    store.seed_outbox_event(outbox_event("1", 1, 5)).await;

    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&bus), config(100));
    let stats = relay.relay_batch().await.unwrap();

    assert_eq!(stats.published, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(store.poll_pending(100, false).await.unwrap().len(), 0);
}
