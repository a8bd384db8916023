//! The purchasing orchestrator: one database transaction covering points,
//! stock, coupon, order, payment, and the outbox append, followed by an
//! asynchronous payment kickoff.
//!
//! # Transaction script
//!
//! 1. Lock the user row.
//! 2. Lock product rows in ascending product id (concurrent orders touching
//!    overlapping item sets then never deadlock), validate stock, snapshot
//!    name and price.
//! 3. Redeem the coupon through its optimistic version; a lost race is
//!    [`CommerceError::CouponRaceLost`].
//! 4. Assemble the order, validating `total = subtotal − discount − points`.
//! 5. Debit points and decrement stock in place.
//! 6. Persist order (Pending) and payment (Pending).
//! 7. Stage `OrderCreated` into the outbox (same transaction).
//! 8. Commit, then hand the collected events to the after-commit hub; the
//!    payment request runs there and never blocks the caller.
//!
//! Concurrency failures (lock wait timeout, non-coupon version clash) are
//! retried twice with jitter; validation and terminal conflicts surface
//! immediately.

use chrono::Utc;
use commerce_core::bus::{stage_outbox, EventCollector, EventHub};
use commerce_core::domain::{Order, OrderItem, Payment, PaymentStatus};
use commerce_core::error::{CommerceError, StoreError};
use commerce_core::event::{DomainEvent, OrderCreated, OrderLine, PaymentRequested};
use commerce_core::ids::{OrderId, ProductId};
use commerce_core::store::{PurchaseStore, PurchaseTx};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Conflict retries after the initial attempt.
const MAX_CONFLICT_RETRIES: u32 = 2;

/// One requested line of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseItem {
    /// Product to purchase.
    pub product_id: ProductId,
    /// Units requested, positive.
    pub quantity: i64,
}

/// Input to [`PurchasingOrchestrator::create_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseCommand {
    /// The purchasing user's external id.
    pub user_external_id: String,
    /// Requested lines; duplicates of one product are merged.
    pub items: Vec<PurchaseItem>,
    /// Coupon code to redeem, if any.
    pub coupon_code: Option<String>,
    /// Points to spend.
    pub used_points: i64,
    /// Card network or issuer label.
    pub card_type: String,
    /// Card number, passed through to the gateway.
    pub card_no: String,
}

/// Result of a successful purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderInfo {
    /// The created order.
    pub order_id: OrderId,
    /// Sum of line totals.
    pub subtotal: i64,
    /// Discount applied by the coupon.
    pub discount_amount: i64,
    /// Points debited.
    pub used_points: i64,
    /// Amount handed to the payment gateway.
    pub total_amount: i64,
}

/// The saga coordinator.
pub struct PurchasingOrchestrator<S> {
    store: Arc<S>,
    hub: Arc<EventHub>,
}

impl<S> PurchasingOrchestrator<S>
where
    S: PurchaseStore,
{
    /// Create an orchestrator over a store and the after-commit hub.
    #[must_use]
    pub const fn new(store: Arc<S>, hub: Arc<EventHub>) -> Self {
        Self { store, hub }
    }

    /// Place an order.
    ///
    /// On success the order exists in Pending (its payment is being driven
    /// asynchronously), points are debited, stock is reserved, the coupon is
    /// consumed, and `OrderCreated` sits in the outbox. On any failure all of
    /// that is rolled back together.
    ///
    /// # Errors
    ///
    /// See [`CommerceError`]; retryable conflicts are retried twice with
    /// jitter before being surfaced.
    pub async fn create_order(&self, command: PurchaseCommand) -> Result<OrderInfo, CommerceError> {
        let items = validate(&command)?;

        let mut attempt = 0;
        loop {
            match self.try_create(&command, &items).await {
                Ok((info, events)) => {
                    // Fire-and-forget: handlers run on the hub's worker pool.
                    let _receipt = self.hub.dispatch(events).await;
                    return Ok(info);
                }
                Err(error) if error.is_retryable_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    let backoff = conflict_backoff(attempt);
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis(),
                        %error,
                        "purchase hit a retryable conflict, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn try_create(
        &self,
        command: &PurchaseCommand,
        items: &BTreeMap<ProductId, i64>,
    ) -> Result<(OrderInfo, Vec<DomainEvent>), CommerceError> {
        let mut collector = EventCollector::new();
        let mut tx = self.store.begin().await.map_err(StoreError::into_conflict_aware)?;

        match run_saga(&mut tx, &mut collector, command, items).await {
            Ok(info) => {
                stage_outbox(&mut tx, collector.events())
                    .await
                    .map_err(CommerceError::from)?;
                tx.commit().await.map_err(StoreError::into_conflict_aware)?;
                tracing::info!(
                    order_id = %info.order_id,
                    total_amount = info.total_amount,
                    "order committed"
                );
                Ok((info, collector.drain()))
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!(%rollback_error, "rollback after failed purchase also failed");
                }
                Err(error)
            }
        }
    }
}

/// Validate the command shape and merge duplicate lines, keyed ascending so
/// iteration doubles as the lock order.
fn validate(command: &PurchaseCommand) -> Result<BTreeMap<ProductId, i64>, CommerceError> {
    if command.items.is_empty() {
        return Err(CommerceError::Validation("order has no items".into()));
    }
    if command.used_points < 0 {
        return Err(CommerceError::Validation(format!(
            "used points must not be negative, got {}",
            command.used_points
        )));
    }
    let mut merged: BTreeMap<ProductId, i64> = BTreeMap::new();
    for item in &command.items {
        if item.quantity <= 0 {
            return Err(CommerceError::Validation(format!(
                "quantity must be positive, got {} for product {}",
                item.quantity, item.product_id
            )));
        }
        *merged.entry(item.product_id).or_insert(0) += item.quantity;
    }
    Ok(merged)
}

async fn run_saga<T: PurchaseTx>(
    tx: &mut T,
    collector: &mut EventCollector,
    command: &PurchaseCommand,
    items: &BTreeMap<ProductId, i64>,
) -> Result<OrderInfo, CommerceError> {
    let mut user = tx.user_for_update(&command.user_external_id).await?;

    // BTreeMap iteration is ascending by product id: the lock order.
    let mut order_items = Vec::with_capacity(items.len());
    for (&product_id, &quantity) in items {
        let mut product = tx.product_for_update(product_id).await?;
        product.reserve_stock(quantity)?;
        order_items.push(OrderItem {
            product_id,
            name: product.name.clone(),
            unit_price: product.price,
            quantity,
        });
        tx.update_product(&product)
            .await
            .map_err(StoreError::into_conflict_aware)?;
    }
    let subtotal: i64 = order_items.iter().map(OrderItem::line_total).sum();

    let discount_amount = match &command.coupon_code {
        Some(code) => {
            let (coupon, mut holding) = tx.coupon_for_redeem(user.id, code).await?;
            holding.mark_used(code)?;
            tx.save_user_coupon(&holding).await.map_err(|error| match error {
                StoreError::VersionConflict(_) => {
                    CommerceError::CouponRaceLost { code: code.clone() }
                }
                other => other.into_conflict_aware(),
            })?;
            coupon.discount.apply(subtotal)
        }
        None => 0,
    };

    let order_id = tx.next_order_id().await.map_err(StoreError::into_conflict_aware)?;
    let order = Order::place(
        order_id,
        user.id,
        order_items,
        discount_amount,
        command.used_points,
        command.coupon_code.clone(),
        Utc::now(),
    )?;

    user.debit_points(command.used_points)?;
    tx.update_user_points(&user)
        .await
        .map_err(StoreError::into_conflict_aware)?;

    tx.insert_order(&order)
        .await
        .map_err(StoreError::into_conflict_aware)?;

    let payment_id = tx.next_payment_id().await.map_err(StoreError::into_conflict_aware)?;
    let payment = Payment {
        id: payment_id,
        order_id,
        user_id: user.id,
        amount: order.total_amount,
        card_type: command.card_type.clone(),
        transaction_key: None,
        status: PaymentStatus::Pending,
    };
    tx.insert_payment(&payment)
        .await
        .map_err(StoreError::into_conflict_aware)?;

    collector.record(DomainEvent::OrderCreated(OrderCreated {
        order_id,
        user_id: user.id,
        coupon_code: command.coupon_code.clone(),
        subtotal,
        used_point_amount: command.used_points,
        items: order
            .items
            .iter()
            .map(|item| OrderLine { product_id: item.product_id, quantity: item.quantity })
            .collect(),
        occurred_at: order.created_at,
    }));
    collector.record(DomainEvent::PaymentRequested(PaymentRequested {
        order_id,
        user_id: user.id,
        user_external_id: command.user_external_id.clone(),
        amount: order.total_amount,
        card_type: command.card_type.clone(),
        card_no: command.card_no.clone(),
        occurred_at: order.created_at,
    }));

    Ok(OrderInfo {
        order_id,
        subtotal,
        discount_amount,
        used_points: command.used_points,
        total_amount: order.total_amount,
    })
}

/// Short jittered backoff between conflict retries.
fn conflict_backoff(attempt: u32) -> Duration {
    let base = 25u64 << attempt;
    Duration::from_millis(rand::thread_rng().gen_range(base..base * 2))
}
