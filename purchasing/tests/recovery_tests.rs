//! Payment recovery loop scenarios.

#![allow(clippy::unwrap_used)]

use commerce_core::bus::EventHub;
use commerce_core::domain::{Brand, OrderStatus, PaymentStatus, Product, User};
use commerce_core::ids::{BrandId, ProductId, UserId};
use commerce_core::store::{GatewayReply, GatewayStatus, GatewayTransaction};
use commerce_purchasing::handlers::PaymentOutcomeHandler;
use commerce_purchasing::{PaymentRecovery, PurchaseCommand, PurchaseItem, PurchasingOrchestrator};
use commerce_testing::{InMemoryCommerceStore, MockPaymentGateway, ScriptedPayment};
use std::sync::Arc;
use std::time::Duration;

struct RecoveryEnv {
    store: Arc<InMemoryCommerceStore>,
    gateway: Arc<MockPaymentGateway>,
    recovery: PaymentRecovery<InMemoryCommerceStore>,
    orchestrator: PurchasingOrchestrator<InMemoryCommerceStore>,
}

async fn env() -> RecoveryEnv {
    let store = Arc::new(InMemoryCommerceStore::new());
    store
        .insert_user(User {
            id: UserId(1),
            external_user_id: "u1".into(),
            email: "u1@example.com".into(),
            point_balance: 10_000,
        })
        .await;
    store.insert_brand(Brand { id: BrandId(1), name: "brand".into() }).await;
    store
        .insert_product(Product {
            id: ProductId(1),
            brand_id: BrandId(1),
            name: "p1".into(),
            price: 2_000,
            stock: 50,
            like_count: 0,
        })
        .await;

    let gateway = MockPaymentGateway::shared();
    // Requests leave payments pending so recovery has work to do.
    gateway
        .script_default(ScriptedPayment::Pending { transaction_key: "tk-async".into() })
        .await;

    let mut hub = EventHub::new(4);
    hub.subscribe(Arc::new(PaymentOutcomeHandler::new(Arc::clone(&store))));
    let hub = Arc::new(hub);

    let orchestrator = PurchasingOrchestrator::new(Arc::clone(&store), Arc::clone(&hub));
    let recovery = PaymentRecovery::new(
        Arc::clone(&store),
        Arc::clone(&gateway) as Arc<dyn commerce_core::store::PaymentGateway>,
        hub,
        Duration::from_secs(60),
    );
    RecoveryEnv { store, gateway, recovery, orchestrator }
}

fn order_command() -> PurchaseCommand {
    PurchaseCommand {
        user_external_id: "u1".into(),
        items: vec![PurchaseItem { product_id: ProductId(1), quantity: 1 }],
        coupon_code: None,
        used_points: 1_000,
        card_type: "VISA".into(),
        card_no: "4111".into(),
    }
}

fn success_tx(key: &str) -> GatewayTransaction {
    GatewayTransaction {
        transaction_key: key.to_owned(),
        status: GatewayStatus::Success,
        reason: None,
    }
}

fn failed_tx(key: &str) -> GatewayTransaction {
    GatewayTransaction {
        transaction_key: key.to_owned(),
        status: GatewayStatus::Failed,
        reason: Some("expired".into()),
    }
}

#[tokio::test]
async fn recovery_completes_orders_the_gateway_settled() {
    let env = env().await;
    let info = env.orchestrator.create_order(order_command()).await.unwrap();
    env.gateway
        .script_query(info.order_id, GatewayReply::Answered(vec![success_tx("tk-1")]))
        .await;

    let stats = env.recovery.reconcile_once().await;
    assert_eq!(stats.examined, 1);
    assert_eq!(stats.completed, 1);

    let order = env.store.order(info.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    let payment = env.store.payment(info.order_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.transaction_key.as_deref(), Some("tk-1"));
}

#[tokio::test]
async fn recovery_cancels_and_refunds_declined_orders() {
    let env = env().await;
    let info = env.orchestrator.create_order(order_command()).await.unwrap();
    assert_eq!(env.store.user(UserId(1)).await.unwrap().point_balance, 9_000);

    env.gateway
        .script_query(info.order_id, GatewayReply::Answered(vec![failed_tx("tk-1")]))
        .await;

    let stats = env.recovery.reconcile_once().await;
    assert_eq!(stats.canceled, 1);

    let order = env.store.order(info.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);
    assert_eq!(env.store.user(UserId(1)).await.unwrap().point_balance, 10_000);
    assert_eq!(env.store.product(ProductId(1)).await.unwrap().stock, 50);
}

#[tokio::test]
async fn pending_and_unavailable_orders_wait_for_the_next_cycle() {
    let env = env().await;
    let waiting = env.orchestrator.create_order(order_command()).await.unwrap();
    let unreachable = env.orchestrator.create_order(order_command()).await.unwrap();

    // `waiting` has no terminal transaction yet; `unreachable` cannot be
    // queried at all.
    env.gateway
        .script_query(waiting.order_id, GatewayReply::Answered(Vec::new()))
        .await;
    env.gateway
        .script_query(unreachable.order_id, GatewayReply::Unavailable)
        .await;

    let stats = env.recovery.reconcile_once().await;
    assert_eq!(stats.examined, 2);
    assert_eq!(stats.left_pending, 2);
    assert_eq!(stats.completed + stats.canceled, 0);

    for order_id in [waiting.order_id, unreachable.order_id] {
        assert_eq!(env.store.order(order_id).await.unwrap().status, OrderStatus::Pending);
    }
}

#[tokio::test]
async fn one_unreachable_order_does_not_block_the_batch() {
    let env = env().await;
    let blocked = env.orchestrator.create_order(order_command()).await.unwrap();
    let settled = env.orchestrator.create_order(order_command()).await.unwrap();

    env.gateway
        .script_query(blocked.order_id, GatewayReply::Unavailable)
        .await;
    env.gateway
        .script_query(settled.order_id, GatewayReply::Answered(vec![success_tx("tk-2")]))
        .await;

    let stats = env.recovery.reconcile_once().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.left_pending, 1);
    assert_eq!(
        env.store.order(settled.order_id).await.unwrap().status,
        OrderStatus::Completed
    );
}

#[tokio::test]
async fn recovery_is_idempotent_over_terminal_orders() {
    let env = env().await;
    let info = env.orchestrator.create_order(order_command()).await.unwrap();
    env.gateway
        .script_query(info.order_id, GatewayReply::Answered(vec![success_tx("tk-1")]))
        .await;

    assert_eq!(env.recovery.reconcile_once().await.completed, 1);
    let balance_after = env.store.user(UserId(1)).await.unwrap().point_balance;
    let stock_after = env.store.product(ProductId(1)).await.unwrap().stock;

    // Terminal orders are no longer pending; repeated passes see nothing.
    for _ in 0..3 {
        let stats = env.recovery.reconcile_once().await;
        assert_eq!(stats.examined, 0);
    }
    assert_eq!(env.store.order(info.order_id).await.unwrap().status, OrderStatus::Completed);
    assert_eq!(env.store.user(UserId(1)).await.unwrap().point_balance, balance_after);
    assert_eq!(env.store.product(ProductId(1)).await.unwrap().stock, stock_after);
}

#[tokio::test]
async fn success_wins_over_a_stale_decline() {
    let env = env().await;
    let info = env.orchestrator.create_order(order_command()).await.unwrap();
    env.gateway
        .script_query(
            info.order_id,
            GatewayReply::Answered(vec![failed_tx("tk-old"), success_tx("tk-new")]),
        )
        .await;

    let stats = env.recovery.reconcile_once().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(
        env.store.order(info.order_id).await.unwrap().status,
        OrderStatus::Completed
    );
}
