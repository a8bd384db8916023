//! Scenario tests for the ranking pipeline and query service.

#![allow(clippy::unwrap_used)]

use chrono::{Days, NaiveDate, TimeZone, Utc};
use commerce_core::config::RankingConfig;
use commerce_core::domain::{Brand, Product};
use commerce_core::event::{DomainEvent, EventEnvelope, LikeChanged, OrderCreated, OrderLine, ProductViewed};
use commerce_core::ids::{BrandId, EventId, OrderId, ProductId, UserId};
use commerce_core::store::{SortedSetStore, StreamingBus};
use commerce_core::view::RankingSource;
use commerce_ranking::keys::ranking_key;
use commerce_ranking::score::order_line_delta;
use commerce_ranking::{CatalogHydrator, RankingCarryOver, RankingQueryService, RankingScorer, SnapshotWriter};
use commerce_testing::{
    InMemoryCommerceStore, InMemoryIdempotencyLedger, InMemoryKVCache, InMemorySnapshotStore,
    InMemorySortedSet, InMemoryStreamingBus,
};
use std::sync::Arc;
use std::time::Duration;

struct Env {
    store: Arc<InMemoryCommerceStore>,
    zset: Arc<InMemorySortedSet>,
    cache: Arc<InMemoryKVCache>,
    snapshots: Arc<InMemorySnapshotStore>,
    ledger: Arc<InMemoryIdempotencyLedger>,
    bus: Arc<InMemoryStreamingBus>,
}

fn config() -> RankingConfig {
    RankingConfig {
        ttl: Duration::from_secs(172_800),
        carry_over_weight: 0.1,
        snapshot_interval: Duration::from_secs(300),
        snapshot_top_k: 1_000,
        coalesce_window: Duration::from_millis(100),
        coalesce_max_messages: 256,
    }
}

async fn env() -> Env {
    let store = Arc::new(InMemoryCommerceStore::new());
    store.insert_brand(Brand { id: BrandId(1), name: "brand-1".into() }).await;
    for (id, price, likes) in [(1_i64, 2_000_i64, 5_i64), (3, 1_000, 9), (7, 500, 2), (9, 4_000, 7)] {
        store
            .insert_product(Product {
                id: ProductId(id),
                brand_id: BrandId(1),
                name: format!("p{id}"),
                price,
                stock: 100,
                like_count: likes,
            })
            .await;
    }
    Env {
        store,
        zset: Arc::new(InMemorySortedSet::new()),
        cache: Arc::new(InMemoryKVCache::new()),
        snapshots: Arc::new(InMemorySnapshotStore::new()),
        ledger: Arc::new(InMemoryIdempotencyLedger::new()),
        bus: Arc::new(InMemoryStreamingBus::new()),
    }
}

fn scorer(
    env: &Env,
) -> RankingScorer<
    InMemoryStreamingBus,
    InMemoryIdempotencyLedger,
    InMemorySortedSet,
    InMemoryCommerceStore,
    InMemoryKVCache,
> {
    let hydrator = CatalogHydrator::new(
        Arc::clone(&env.store),
        Arc::clone(&env.cache),
        Duration::from_secs(300),
    );
    RankingScorer::new(
        Arc::clone(&env.bus),
        Arc::clone(&env.ledger),
        Arc::clone(&env.zset),
        hydrator,
        config(),
    )
}

fn query_service(
    env: &Env,
) -> RankingQueryService<InMemorySortedSet, InMemorySnapshotStore, InMemoryCommerceStore, InMemoryKVCache>
{
    let hydrator = CatalogHydrator::new(
        Arc::clone(&env.store),
        Arc::clone(&env.cache),
        Duration::from_secs(300),
    );
    RankingQueryService::new(
        Arc::clone(&env.zset),
        Arc::clone(&env.snapshots),
        Arc::clone(&env.store),
        hydrator,
    )
}

fn today() -> NaiveDate {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap().date_naive()
}

fn envelope(event: &DomainEvent) -> EventEnvelope {
    let route = event.route().unwrap();
    EventEnvelope {
        event_id: EventId::new(),
        event_type: event.event_type().to_owned(),
        aggregate_id: route.aggregate_id,
        aggregate_type: route.aggregate_type.to_owned(),
        version: 1,
        occurred_at: event.occurred_at(),
        payload: event.payload_json().unwrap(),
    }
}

fn like_added(product: i64) -> EventEnvelope {
    envelope(&DomainEvent::LikeAdded(LikeChanged {
        user_id: UserId(1),
        product_id: ProductId(product),
        occurred_at: Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap(),
    }))
}

#[tokio::test]
async fn scorer_applies_weighted_deltas() {
    let env = env().await;
    let scorer = scorer(&env);
    let occurred = Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap();

    scorer
        .apply_envelope(&envelope(&DomainEvent::ProductViewed(ProductViewed {
            product_id: ProductId(1),
            user_id: UserId(1),
            occurred_at: occurred,
        })))
        .await
        .unwrap();
    scorer.apply_envelope(&like_added(1)).await.unwrap();
    scorer
        .apply_envelope(&envelope(&DomainEvent::OrderCreated(OrderCreated {
            order_id: OrderId(1),
            user_id: UserId(1),
            coupon_code: None,
            subtotal: 4_000,
            used_point_amount: 0,
            items: vec![OrderLine { product_id: ProductId(1), quantity: 2 }],
            occurred_at: occurred,
        })))
        .await
        .unwrap();
    scorer.flush().await;

    let key = ranking_key(today());
    let expected = 0.1 + 0.2 + order_line_delta(2_000, 2);
    let score = env.zset.score(&key, "1").await.unwrap();
    assert!((score - expected).abs() < 1e-9);
}

#[tokio::test]
async fn like_removed_subtracts_its_weight() {
    let env = env().await;
    let scorer = scorer(&env);
    let occurred = Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap();

    scorer.apply_envelope(&like_added(3)).await.unwrap();
    scorer
        .apply_envelope(&envelope(&DomainEvent::LikeRemoved(LikeChanged {
            user_id: UserId(1),
            product_id: ProductId(3),
            occurred_at: occurred,
        })))
        .await
        .unwrap();
    scorer.flush().await;

    let score = env.zset.score(&ranking_key(today()), "3").await.unwrap();
    assert!(score.abs() < 1e-9);
}

#[tokio::test]
async fn redelivered_event_scores_once() {
    let env = env().await;
    let scorer = scorer(&env);
    let message = like_added(7);

    assert!(scorer.apply_envelope(&message).await.unwrap());
    scorer.flush().await;
    // Redelivery with the same event id.
    assert!(!scorer.apply_envelope(&message).await.unwrap());
    scorer.flush().await;

    let score = env.zset.score(&ranking_key(today()), "7").await.unwrap();
    assert!((score - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn ranking_ttl_is_set_exactly_once() {
    let env = env().await;
    let scorer = scorer(&env);

    scorer.apply_envelope(&like_added(1)).await.unwrap();
    scorer.flush().await;
    scorer.apply_envelope(&like_added(3)).await.unwrap();
    scorer.flush().await;

    assert_eq!(
        env.zset.ttl(&ranking_key(today())).await,
        Some(Duration::from_secs(172_800))
    );
}

#[tokio::test]
async fn coalescing_buffers_until_flush() {
    let env = env().await;
    let scorer = scorer(&env);

    for _ in 0..3 {
        scorer.apply_envelope(&like_added(1)).await.unwrap();
    }
    assert_eq!(scorer.buffered_messages().await, 3);
    assert!(env.zset.score(&ranking_key(today()), "1").await.is_none());

    scorer.flush().await;
    assert_eq!(scorer.buffered_messages().await, 0);
    let score = env.zset.score(&ranking_key(today()), "1").await.unwrap();
    assert!((score - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn live_page_is_sound() {
    let env = env().await;
    let key = ranking_key(today());
    for (product, score) in [("1", 4.0), ("3", 3.0), ("7", 2.0), ("9", 1.0)] {
        env.zset.incr_score(&key, product, score).await.unwrap();
    }

    let service = query_service(&env);
    let page = service.get_rankings(today(), 0, 3).await;

    assert_eq!(page.source, RankingSource::Live);
    assert_eq!(page.entries.len(), 3);
    assert!(page.has_next);
    // Ranks contiguous from 1, scores strictly decreasing.
    for (index, entry) in page.entries.iter().enumerate() {
        assert_eq!(entry.rank, index as u64 + 1);
    }
    for pair in page.entries.windows(2) {
        assert!(pair[0].score > pair[1].score);
    }

    let last = service.get_rankings(today(), 1, 3).await;
    assert_eq!(last.entries.len(), 1);
    assert_eq!(last.entries[0].rank, 4);
    assert!(!last.has_next);
}

#[tokio::test]
async fn live_page_skips_unknown_products() {
    let env = env().await;
    let key = ranking_key(today());
    env.zset.incr_score(&key, "1", 5.0).await.unwrap();
    // No product 999 in the catalog.
    env.zset.incr_score(&key, "999", 4.0).await.unwrap();
    env.zset.incr_score(&key, "3", 3.0).await.unwrap();

    let page = query_service(&env).get_rankings(today(), 0, 10).await;
    let ids: Vec<i64> = page.entries.iter().map(|e| e.product.id.0).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(page.entries[1].rank, 2);
}

#[tokio::test]
async fn snapshot_serves_when_redis_is_down() {
    let env = env().await;
    let writer = SnapshotWriter::new(
        Arc::clone(&env.zset),
        Arc::clone(&env.snapshots),
        CatalogHydrator::new(Arc::clone(&env.store), Arc::clone(&env.cache), Duration::from_secs(300)),
        1_000,
        Duration::from_secs(300),
    );
    let key = ranking_key(today());
    env.zset.incr_score(&key, "3", 9.0).await.unwrap();
    env.zset.incr_score(&key, "9", 4.0).await.unwrap();
    writer.write_snapshot(today()).await.unwrap();

    env.zset.set_available(false);
    let page = query_service(&env).get_rankings(today(), 0, 10).await;

    assert_eq!(page.source, RankingSource::Snapshot);
    let ids: Vec<i64> = page.entries.iter().map(|e| e.product.id.0).collect();
    assert_eq!(ids, vec![3, 9]);
    assert_eq!(page.entries[0].rank, 1);
    assert_eq!(page.entries[1].rank, 2);
    assert!(!page.has_next);
}

#[tokio::test]
async fn previous_day_snapshot_is_the_third_tier() {
    let env = env().await;
    let yesterday = today().checked_sub_days(Days::new(1)).unwrap();
    let writer = SnapshotWriter::new(
        Arc::clone(&env.zset),
        Arc::clone(&env.snapshots),
        CatalogHydrator::new(Arc::clone(&env.store), Arc::clone(&env.cache), Duration::from_secs(300)),
        1_000,
        Duration::from_secs(300),
    );
    env.zset.incr_score(&ranking_key(yesterday), "7", 3.0).await.unwrap();
    writer.write_snapshot(yesterday).await.unwrap();

    env.zset.set_available(false);
    let page = query_service(&env).get_rankings(today(), 0, 10).await;

    assert_eq!(page.source, RankingSource::PreviousSnapshot);
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].product.id, ProductId(7));
}

#[tokio::test]
async fn default_view_never_throws() {
    let env = env().await;
    env.zset.set_available(false);
    env.snapshots.set_available(false);

    let page = query_service(&env).get_rankings(today(), 0, 3).await;

    assert_eq!(page.source, RankingSource::Default);
    // Ordered by like_count descending: p3 (9), p9 (7), p1 (5), then p7 (2).
    let ids: Vec<i64> = page.entries.iter().map(|e| e.product.id.0).collect();
    assert_eq!(ids, vec![3, 9, 1]);
    assert!((page.entries[0].score - 9.0).abs() < f64::EPSILON);
    assert!(page.has_next);

    let next = query_service(&env).get_rankings(today(), 1, 3).await;
    assert_eq!(next.entries.len(), 1);
    assert_eq!(next.entries[0].rank, 4);
    assert!(!next.has_next);
}

#[tokio::test]
async fn product_rank_is_one_based_and_none_when_absent() {
    let env = env().await;
    let key = ranking_key(today());
    env.zset.incr_score(&key, "1", 5.0).await.unwrap();
    env.zset.incr_score(&key, "3", 7.0).await.unwrap();

    let service = query_service(&env);
    assert_eq!(service.get_product_rank(ProductId(3), today()).await, Some(1));
    assert_eq!(service.get_product_rank(ProductId(1), today()).await, Some(2));
    assert_eq!(service.get_product_rank(ProductId(9), today()).await, None);

    env.zset.set_available(false);
    assert_eq!(service.get_product_rank(ProductId(3), today()).await, None);
}

#[tokio::test]
async fn carry_over_decays_yesterday_into_today() {
    let env = env().await;
    let yesterday = today().checked_sub_days(Days::new(1)).unwrap();
    env.zset.incr_score(&ranking_key(yesterday), "1", 10.0).await.unwrap();
    env.zset.incr_score(&ranking_key(yesterday), "3", 4.0).await.unwrap();
    env.zset.incr_score(&ranking_key(today()), "1", 1.0).await.unwrap();

    let task = RankingCarryOver::new(Arc::clone(&env.zset), 0.1, Duration::from_secs(172_800));
    assert_eq!(task.carry_into(today()).await.unwrap(), 2);

    let key = ranking_key(today());
    assert!((env.zset.score(&key, "1").await.unwrap() - 2.0).abs() < 1e-9);
    assert!((env.zset.score(&key, "3").await.unwrap() - 0.4).abs() < 1e-9);

    // A same-date rerun is refused; applying twice would double the bias.
    assert_eq!(task.carry_into(today()).await.unwrap(), 0);
    assert!((env.zset.score(&key, "1").await.unwrap() - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn snapshot_writer_hydrates_and_ranks() {
    let env = env().await;
    let key = ranking_key(today());
    env.zset.incr_score(&key, "9", 8.0).await.unwrap();
    env.zset.incr_score(&key, "1", 6.0).await.unwrap();
    env.zset.incr_score(&key, "424242", 7.0).await.unwrap(); // not in catalog

    let writer = SnapshotWriter::new(
        Arc::clone(&env.zset),
        Arc::clone(&env.snapshots),
        CatalogHydrator::new(Arc::clone(&env.store), Arc::clone(&env.cache), Duration::from_secs(300)),
        2,
        Duration::from_secs(300),
    );
    let written = writer.write_snapshot(today()).await.unwrap();

    // Top 2 of the set are 9 (8.0) and 424242 (7.0); the unknown product is
    // dropped during hydration.
    assert_eq!(written, 1);
    use commerce_core::store::SnapshotStore;
    let snapshot = env.snapshots.get(today()).await.unwrap().unwrap();
    assert_eq!(snapshot.total_size, 3);
    assert_eq!(snapshot.entries[0].product.id, ProductId(9));
    assert_eq!(snapshot.entries[0].rank, 1);
}

#[tokio::test]
async fn scorer_run_consumes_from_the_bus() {
    let env = env().await;
    let scorer = Arc::new(scorer(&env));
    let message = like_added(1);
    env.bus
        .publish(
            commerce_core::event::topics::LIKE_EVENTS,
            "1",
            &message.encode().unwrap(),
        )
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = {
        let scorer = Arc::clone(&scorer);
        tokio::spawn(async move { scorer.run(shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(true).unwrap();
    runner.await.unwrap().unwrap();

    let score = env.zset.score(&ranking_key(today()), "1").await.unwrap();
    assert!((score - 0.2).abs() < 1e-9);
}
