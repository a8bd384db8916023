//! End-to-end purchasing saga scenarios against the in-memory store.

#![allow(clippy::unwrap_used)]

use commerce_core::bus::EventHub;
use commerce_core::domain::{Brand, Coupon, Discount, OrderStatus, PaymentStatus, Product, User, UserCoupon};
use commerce_core::error::{CommerceError, ErrorKind};
use commerce_core::ids::{BrandId, CouponId, ProductId, UserId};
use commerce_purchasing::handlers::{PaymentKickoffHandler, PaymentOutcomeHandler};
use commerce_purchasing::{PurchaseCommand, PurchaseItem, PurchasingOrchestrator};
use commerce_testing::{InMemoryCommerceStore, MockPaymentGateway, ScriptedPayment};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

struct TestEnv {
    store: Arc<InMemoryCommerceStore>,
    gateway: Arc<MockPaymentGateway>,
    orchestrator: PurchasingOrchestrator<InMemoryCommerceStore>,
}

async fn env() -> TestEnv {
    let store = Arc::new(InMemoryCommerceStore::new());
    let gateway = MockPaymentGateway::shared();

    let mut hub = EventHub::new(4);
    hub.subscribe(Arc::new(PaymentKickoffHandler::new(
        Arc::clone(&store),
        Arc::clone(&gateway) as Arc<dyn commerce_core::store::PaymentGateway>,
        None,
    )));
    hub.subscribe(Arc::new(PaymentOutcomeHandler::new(Arc::clone(&store))));
    let hub = Arc::new(hub);

    let orchestrator = PurchasingOrchestrator::new(Arc::clone(&store), hub);
    TestEnv { store, gateway, orchestrator }
}

async fn seed_user(env: &TestEnv, id: i64, balance: i64) {
    env.store
        .insert_user(User {
            id: UserId(id),
            external_user_id: format!("u{id}"),
            email: format!("u{id}@example.com"),
            point_balance: balance,
        })
        .await;
}

async fn seed_product(env: &TestEnv, id: i64, price: i64, stock: i64) {
    env.store.insert_brand(Brand { id: BrandId(1), name: "brand".into() }).await;
    env.store
        .insert_product(Product {
            id: ProductId(id),
            brand_id: BrandId(1),
            name: format!("p{id}"),
            price,
            stock,
            like_count: 0,
        })
        .await;
}

fn command(user: &str, items: Vec<(i64, i64)>, used_points: i64) -> PurchaseCommand {
    PurchaseCommand {
        user_external_id: user.to_owned(),
        items: items
            .into_iter()
            .map(|(id, quantity)| PurchaseItem { product_id: ProductId(id), quantity })
            .collect(),
        coupon_code: None,
        used_points,
        card_type: "VISA".into(),
        card_no: "4111-1111-1111-1111".into(),
    }
}

async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn s1_successful_purchase_debits_reserves_and_stages_outbox() {
    let env = env().await;
    seed_user(&env, 1, 10_000).await;
    seed_product(&env, 1, 2_000, 5).await;

    let info = env
        .orchestrator
        .create_order(command("u1", vec![(1, 2)], 1_000))
        .await
        .unwrap();

    assert_eq!(info.subtotal, 4_000);
    assert_eq!(info.discount_amount, 0);
    assert_eq!(info.total_amount, 3_000);

    assert_eq!(env.store.user(UserId(1)).await.unwrap().point_balance, 9_000);
    assert_eq!(env.store.product(ProductId(1)).await.unwrap().stock, 3);

    let order = env.store.order(info.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.items[0].unit_price, 2_000);

    let payment = env.store.payment(info.order_id).await.unwrap();
    assert_eq!(payment.amount, 3_000);

    let outbox = env.store.outbox_events().await;
    assert_eq!(outbox.len(), 1);
    let event = &outbox[0];
    assert_eq!(event.event_type, "OrderCreated");
    assert_eq!(event.aggregate_type, "Order");
    assert_eq!(event.aggregate_id, info.order_id.to_string());
    assert_eq!(event.version, 1);
    assert_eq!(event.partition_key, info.order_id.to_string());
    assert_eq!(event.topic, "order-events");

    let envelope = event.envelope().unwrap();
    assert_eq!(envelope.payload["usedPointAmount"], 1_000);
    assert_eq!(envelope.payload["items"][0]["quantity"], 2);
}

#[tokio::test]
async fn s2_synchronous_decline_compensates_everything() {
    let env = env().await;
    seed_user(&env, 1, 10_000).await;
    seed_product(&env, 1, 2_000, 5).await;
    env.gateway
        .script_default(ScriptedPayment::Failed {
            transaction_key: "tk-declined".into(),
            reason: "card declined".into(),
        })
        .await;

    let info = env
        .orchestrator
        .create_order(command("u1", vec![(1, 2)], 1_000))
        .await
        .unwrap();

    let store = Arc::clone(&env.store);
    let order_id = info.order_id;
    assert!(
        eventually(|| {
            let store = Arc::clone(&store);
            async move {
                store.order(order_id).await.unwrap().status == OrderStatus::Canceled
            }
        })
        .await,
        "order was not canceled in time"
    );

    assert_eq!(env.store.user(UserId(1)).await.unwrap().point_balance, 10_000);
    assert_eq!(env.store.product(ProductId(1)).await.unwrap().stock, 5);
    assert_eq!(
        env.store.payment(order_id).await.unwrap().status,
        PaymentStatus::Failed
    );

    let outbox = env.store.outbox_events().await;
    let types: Vec<&str> = outbox.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["OrderCreated", "OrderCanceled"]);
    assert_eq!(outbox[1].version, 2);
}

#[tokio::test]
async fn synchronous_success_completes_the_order() {
    let env = env().await;
    seed_user(&env, 1, 5_000).await;
    seed_product(&env, 1, 1_000, 3).await;
    env.gateway
        .script_default(ScriptedPayment::Success { transaction_key: "tk-ok".into() })
        .await;

    let info = env
        .orchestrator
        .create_order(command("u1", vec![(1, 1)], 0))
        .await
        .unwrap();

    let store = Arc::clone(&env.store);
    let order_id = info.order_id;
    assert!(
        eventually(|| {
            let store = Arc::clone(&store);
            async move {
                store.order(order_id).await.unwrap().status == OrderStatus::Completed
            }
        })
        .await
    );

    let payment = env.store.payment(order_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.transaction_key.as_deref(), Some("tk-ok"));
}

#[tokio::test]
async fn pending_gateway_reply_records_the_transaction_key() {
    let env = env().await;
    seed_user(&env, 1, 5_000).await;
    seed_product(&env, 1, 1_000, 3).await;
    env.gateway
        .script_default(ScriptedPayment::Pending { transaction_key: "tk-wait".into() })
        .await;

    let info = env
        .orchestrator
        .create_order(command("u1", vec![(1, 1)], 0))
        .await
        .unwrap();

    let store = Arc::clone(&env.store);
    let order_id = info.order_id;
    assert!(
        eventually(|| {
            let store = Arc::clone(&store);
            async move {
                store
                    .payment(order_id)
                    .await
                    .unwrap()
                    .transaction_key
                    .as_deref()
                    == Some("tk-wait")
            }
        })
        .await
    );
    assert_eq!(env.store.order(order_id).await.unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
async fn gateway_outage_leaves_the_order_pending() {
    let env = env().await;
    seed_user(&env, 1, 5_000).await;
    seed_product(&env, 1, 1_000, 3).await;
    env.gateway.script_default(ScriptedPayment::Unavailable).await;

    let info = env
        .orchestrator
        .create_order(command("u1", vec![(1, 1)], 0))
        .await
        .unwrap();

    // Give the kickoff handler time to run; nothing must change.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(env.store.order(info.order_id).await.unwrap().status, OrderStatus::Pending);
    assert_eq!(env.store.product(ProductId(1)).await.unwrap().stock, 2);
}

#[tokio::test]
async fn insufficient_points_rolls_back_everything() {
    let env = env().await;
    seed_user(&env, 1, 500).await;
    seed_product(&env, 1, 2_000, 5).await;

    let error = env
        .orchestrator
        .create_order(command("u1", vec![(1, 1)], 1_000))
        .await
        .unwrap_err();

    assert!(matches!(error, CommerceError::InsufficientPoints { .. }));
    assert_eq!(env.store.user(UserId(1)).await.unwrap().point_balance, 500);
    assert_eq!(env.store.product(ProductId(1)).await.unwrap().stock, 5);
    assert!(env.store.outbox_events().await.is_empty());
    assert!(env.store.orders().await.is_empty());
}

#[tokio::test]
async fn insufficient_stock_is_a_terminal_conflict() {
    let env = env().await;
    seed_user(&env, 1, 10_000).await;
    seed_product(&env, 1, 2_000, 1).await;

    let error = env
        .orchestrator
        .create_order(command("u1", vec![(1, 3)], 0))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::ConflictTerminal);
    assert!(matches!(
        error,
        CommerceError::InsufficientStock { requested: 3, available: 1, .. }
    ));
}

#[tokio::test]
async fn coupon_discount_applies_and_negative_total_is_rejected() {
    let env = env().await;
    seed_user(&env, 1, 10_000).await;
    seed_product(&env, 1, 2_000, 5).await;
    env.store
        .insert_coupon(Coupon { id: CouponId(1), code: "C10".into(), discount: Discount::Percentage(10) })
        .await;
    env.store
        .insert_user_coupon(UserCoupon {
            user_id: UserId(1),
            coupon_id: CouponId(1),
            is_used: false,
            version: 0,
        })
        .await;

    let mut with_coupon = command("u1", vec![(1, 2)], 1_000);
    with_coupon.coupon_code = Some("C10".into());
    let info = env.orchestrator.create_order(with_coupon).await.unwrap();

    // 4000 - 400 (10%) - 1000 points
    assert_eq!(info.discount_amount, 400);
    assert_eq!(info.total_amount, 2_600);
    let holding = env.store.user_coupon(UserId(1), CouponId(1)).await.unwrap();
    assert!(holding.is_used);
    assert_eq!(holding.version, 1);

    // A big fixed coupon plus points can push the total negative.
    env.store
        .insert_coupon(Coupon { id: CouponId(2), code: "BIG".into(), discount: Discount::Fixed(5_000) })
        .await;
    env.store
        .insert_user_coupon(UserCoupon {
            user_id: UserId(1),
            coupon_id: CouponId(2),
            is_used: false,
            version: 0,
        })
        .await;
    let mut negative = command("u1", vec![(1, 1)], 1_000);
    negative.coupon_code = Some("BIG".into());
    let error = env.orchestrator.create_order(negative).await.unwrap_err();
    assert!(matches!(error, CommerceError::InvalidAmount(-1_000)));
}

#[tokio::test]
async fn s3_twenty_concurrent_orders_for_ten_units() {
    let env = env().await;
    let initial_stock = 10;
    seed_product(&env, 1, 2_000, initial_stock).await;
    for user in 1..=20 {
        seed_user(&env, user, 50_000).await;
    }

    let orchestrator = Arc::new(env.orchestrator);
    let mut handles = Vec::new();
    for user in 1..=20 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator
                .create_order(command(&format!("u{user}"), vec![(1, 1)], 0))
                .await
        }));
    }

    let mut succeeded = 0;
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(CommerceError::InsufficientStock { .. }) => out_of_stock += 1,
            Err(other) => {
                // Any other failure breaks the scenario.
                unreachable_failure(&other);
            }
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(out_of_stock, 10);
    assert_eq!(env.store.product(ProductId(1)).await.unwrap().stock, 0);

    // Stock conservation: stock + units held by non-canceled orders is the
    // initial stock.
    let held: i64 = env
        .store
        .orders()
        .await
        .iter()
        .filter(|order| order.status != OrderStatus::Canceled)
        .flat_map(|order| order.items.iter())
        .map(|item| item.quantity)
        .sum();
    assert_eq!(held, initial_stock);
}

#[tokio::test]
async fn s4_concurrent_coupon_redemptions_have_one_winner() {
    let env = env().await;
    seed_user(&env, 1, 50_000).await;
    seed_product(&env, 1, 2_000, 100).await;
    env.store
        .insert_coupon(Coupon { id: CouponId(1), code: "C1".into(), discount: Discount::Fixed(500) })
        .await;
    env.store
        .insert_user_coupon(UserCoupon {
            user_id: UserId(1),
            coupon_id: CouponId(1),
            is_used: false,
            version: 0,
        })
        .await;

    let orchestrator = Arc::new(env.orchestrator);
    let mut handles = Vec::new();
    for _ in 0..5 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            let mut cmd = command("u1", vec![(1, 1)], 0);
            cmd.coupon_code = Some("C1".into());
            orchestrator.create_order(cmd).await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(info) => {
                winners += 1;
                assert_eq!(info.discount_amount, 500);
            }
            Err(
                CommerceError::CouponRaceLost { .. } | CommerceError::CouponAlreadyUsed { .. },
            ) => losers += 1,
            Err(other) => unreachable_failure(&other),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(losers, 4);
    let holding = env.store.user_coupon(UserId(1), CouponId(1)).await.unwrap();
    assert!(holding.is_used);
    assert_eq!(holding.version, 1);
}

#[tokio::test]
async fn outbox_versions_are_monotonic_per_aggregate() {
    let env = env().await;
    seed_user(&env, 1, 10_000).await;
    seed_product(&env, 1, 2_000, 10).await;
    env.gateway
        .script_default(ScriptedPayment::Failed {
            transaction_key: "tk".into(),
            reason: "declined".into(),
        })
        .await;

    let first = env
        .orchestrator
        .create_order(command("u1", vec![(1, 1)], 0))
        .await
        .unwrap();

    let store = Arc::clone(&env.store);
    let order_id = first.order_id;
    assert!(
        eventually(|| {
            let store = Arc::clone(&store);
            async move { store.outbox_events().await.len() == 2 }
        })
        .await
    );

    let events = env.store.outbox_events().await;
    let versions: Vec<i64> = events
        .iter()
        .filter(|e| e.aggregate_id == order_id.to_string())
        .map(|e| e.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);

    // A second order starts its own stream at version 1.
    env.gateway
        .script_default(ScriptedPayment::Pending { transaction_key: "tk2".into() })
        .await;
    let second = env
        .orchestrator
        .create_order(command("u1", vec![(1, 1)], 0))
        .await
        .unwrap();
    let events = env.store.outbox_events().await;
    let second_versions: Vec<i64> = events
        .iter()
        .filter(|e| e.aggregate_id == second.order_id.to_string())
        .map(|e| e.version)
        .collect();
    assert_eq!(second_versions, vec![1]);
}

fn unreachable_failure(error: &CommerceError) {
    assert!(false, "unexpected saga failure: {error}");
}
