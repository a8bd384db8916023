//! After-commit handlers: payment kickoff and payment outcome application.
//!
//! Both handlers are idempotent against redelivery: every state change starts
//! by re-locking the order and bailing out if it is already terminal, so a
//! replayed `PaymentCompleted` or a recovery pass over a settled order is a
//! no-op.

use commerce_core::bus::{stage_outbox, AfterCommitHandler, EventCollector};
use commerce_core::domain::{OrderStatus, PaymentStatus};
use commerce_core::error::CommerceError;
use commerce_core::event::{DomainEvent, OrderCanceled, PaymentRequested};
use commerce_core::ids::OrderId;
use commerce_core::store::{
    GatewayReply, GatewayStatus, OrderReader, PaymentGateway, PaymentRequest, PurchaseStore,
    PurchaseTx,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Apply `Pending → Completed` to an order and mark its payment successful.
///
/// Returns `false` when the order was already terminal (nothing changed).
///
/// # Errors
///
/// Propagates store failures; the caller (hub or recovery loop) logs them
/// and the transition rides on the next delivery.
pub async fn complete_order<S>(
    store: &S,
    order_id: OrderId,
    transaction_key: Option<&str>,
) -> Result<bool, CommerceError>
where
    S: PurchaseStore,
{
    let mut tx = store.begin().await?;
    let order = tx.order_for_update(order_id).await?;
    if order.status.is_terminal() {
        tracing::debug!(%order_id, status = ?order.status, "order already terminal, ignoring completion");
        tx.rollback().await.map_err(CommerceError::from)?;
        return Ok(false);
    }

    tx.set_order_status(order_id, OrderStatus::Completed).await?;
    tx.set_payment_result(order_id, PaymentStatus::Success, transaction_key)
        .await?;
    tx.commit().await?;

    tracing::info!(%order_id, "order completed");
    Ok(true)
}

/// Compensate a failed payment: restore stock from the item snapshots,
/// credit the used points back, cancel the order, and emit `OrderCanceled`
/// through the outbox.
///
/// Rows are re-locked in the same order the saga takes them (user first,
/// then products ascending). The consumed coupon is left as-is and surfaced
/// at WARN for operator follow-up; re-arming it automatically risks double
/// discounts under replay.
///
/// Returns `false` when the order was already terminal.
///
/// # Errors
///
/// Propagates store failures; compensation is retried on the next
/// `PaymentFailed` delivery or recovery pass.
pub async fn compensate_order<S>(
    store: &S,
    order_id: OrderId,
    reason: Option<&str>,
) -> Result<bool, CommerceError>
where
    S: PurchaseStore + OrderReader,
{
    let mut tx = store.begin().await?;
    let order = tx.order_for_update(order_id).await?;
    if order.status.is_terminal() {
        tracing::debug!(%order_id, status = ?order.status, "order already terminal, ignoring compensation");
        tx.rollback().await.map_err(CommerceError::from)?;
        return Ok(false);
    }

    let external_user_id = store.external_user_id(order.user_id).await?;
    let mut user = tx.user_for_update(&external_user_id).await?;

    let mut items = order.items.clone();
    items.sort_by_key(|item| item.product_id);
    for item in &items {
        let mut product = tx.product_for_update(item.product_id).await?;
        product.release_stock(item.quantity);
        tx.update_product(&product).await?;
    }

    user.credit_points(order.used_points);
    tx.update_user_points(&user).await?;

    tx.set_order_status(order_id, OrderStatus::Canceled).await?;
    tx.set_payment_result(order_id, PaymentStatus::Failed, None).await?;

    if let Some(code) = &order.coupon_code {
        tracing::warn!(
            %order_id,
            coupon_code = %code,
            "coupon stays consumed after failed payment; re-issue manually if warranted"
        );
    }

    let mut collector = EventCollector::new();
    collector.record(DomainEvent::OrderCanceled(OrderCanceled {
        order_id,
        user_id: order.user_id,
        refunded_points: order.used_points,
        occurred_at: chrono::Utc::now(),
    }));
    stage_outbox(&mut tx, collector.events())
        .await
        .map_err(CommerceError::from)?;

    tx.commit().await?;

    tracing::info!(
        %order_id,
        refunded_points = order.used_points,
        reason = reason.unwrap_or("unspecified"),
        "order canceled and compensated"
    );
    Ok(true)
}

/// Record a gateway-issued transaction key on a still-pending payment.
async fn record_pending_key<S>(
    store: &S,
    order_id: OrderId,
    transaction_key: &str,
) -> Result<(), CommerceError>
where
    S: PurchaseStore,
{
    let mut tx = store.begin().await?;
    let order = tx.order_for_update(order_id).await?;
    if order.status.is_terminal() {
        tx.rollback().await.map_err(CommerceError::from)?;
        return Ok(());
    }
    tx.set_payment_result(order_id, PaymentStatus::Pending, Some(transaction_key))
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Reacts to `PaymentRequested`: calls the gateway and applies a synchronous
/// terminal outcome immediately. A pending reply records the transaction key
/// and leaves the order for the recovery loop; an unavailable gateway leaves
/// everything untouched.
pub struct PaymentKickoffHandler<S> {
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    callback_url: Option<String>,
}

impl<S> PaymentKickoffHandler<S>
where
    S: PurchaseStore + OrderReader,
{
    /// Create the handler.
    #[must_use]
    pub const fn new(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        callback_url: Option<String>,
    ) -> Self {
        Self { store, gateway, callback_url }
    }

    async fn request_payment(&self, request: &PaymentRequested) -> Result<(), CommerceError> {
        let body = PaymentRequest {
            order_id: request.order_id,
            card_type: request.card_type.clone(),
            card_no: request.card_no.clone(),
            amount: request.amount,
            callback_url: self.callback_url.clone(),
        };

        match self
            .gateway
            .request_payment(&request.user_external_id, &body)
            .await
        {
            Ok(GatewayReply::Answered(transaction)) => match transaction.status {
                GatewayStatus::Success => {
                    complete_order(
                        self.store.as_ref(),
                        request.order_id,
                        Some(&transaction.transaction_key),
                    )
                    .await?;
                    Ok(())
                }
                GatewayStatus::Failed => {
                    compensate_order(
                        self.store.as_ref(),
                        request.order_id,
                        transaction.reason.as_deref(),
                    )
                    .await?;
                    Ok(())
                }
                GatewayStatus::Pending => {
                    tracing::info!(
                        order_id = %request.order_id,
                        transaction_key = %transaction.transaction_key,
                        "payment accepted, awaiting gateway resolution"
                    );
                    record_pending_key(
                        self.store.as_ref(),
                        request.order_id,
                        &transaction.transaction_key,
                    )
                    .await
                }
            },
            Ok(GatewayReply::Unavailable) => {
                tracing::warn!(
                    order_id = %request.order_id,
                    "gateway unavailable, payment state unknown; recovery loop will converge"
                );
                Ok(())
            }
            Err(error) => {
                tracing::error!(
                    order_id = %request.order_id,
                    %error,
                    "payment request rejected; order stays pending for recovery"
                );
                Err(error)
            }
        }
    }
}

impl<S> AfterCommitHandler for PaymentKickoffHandler<S>
where
    S: PurchaseStore + OrderReader,
{
    fn name(&self) -> &'static str {
        "payment-kickoff"
    }

    fn handle(
        &self,
        event: &DomainEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), CommerceError>> + Send + '_>> {
        let request = match event {
            DomainEvent::PaymentRequested(request) => Some(request.clone()),
            _ => None,
        };
        Box::pin(async move {
            match request {
                Some(request) => self.request_payment(&request).await,
                None => Ok(()),
            }
        })
    }
}

/// Reacts to `PaymentCompleted` / `PaymentFailed` (emitted by the recovery
/// loop or other in-process producers) by applying the order transition.
pub struct PaymentOutcomeHandler<S> {
    store: Arc<S>,
}

impl<S> PaymentOutcomeHandler<S>
where
    S: PurchaseStore + OrderReader,
{
    /// Create the handler.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S> AfterCommitHandler for PaymentOutcomeHandler<S>
where
    S: PurchaseStore + OrderReader,
{
    fn name(&self) -> &'static str {
        "payment-outcome"
    }

    fn handle(
        &self,
        event: &DomainEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), CommerceError>> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move {
            match event {
                DomainEvent::PaymentCompleted(completed) => {
                    complete_order(
                        self.store.as_ref(),
                        completed.order_id,
                        completed.transaction_key.as_deref(),
                    )
                    .await?;
                    Ok(())
                }
                DomainEvent::PaymentFailed(failed) => {
                    compensate_order(self.store.as_ref(), failed.order_id, failed.reason.as_deref())
                        .await?;
                    Ok(())
                }
                _ => Ok(()),
            }
        })
    }
}
