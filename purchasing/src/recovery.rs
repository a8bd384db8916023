//! Payment recovery loop: a periodic reconciler that converges Pending
//! orders by asking the gateway what actually happened.
//!
//! Each cycle walks all Pending orders independently; one order's failure
//! never aborts the batch. Terminal gateway statuses are turned into
//! `PaymentCompleted` / `PaymentFailed` events and dispatched through the
//! after-commit hub, whose outcome handler ignores orders that already
//! reached a terminal state, so running the loop over settled orders any
//! number of times changes nothing.

use chrono::Utc;
use commerce_core::bus::EventHub;
use commerce_core::domain::Order;
use commerce_core::error::CommerceError;
use commerce_core::event::{DomainEvent, PaymentCompleted, PaymentFailed};
use commerce_core::store::{GatewayReply, GatewayStatus, OrderReader, PaymentGateway, PurchaseStore};
use commerce_runtime::scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Pending orders examined.
    pub examined: u64,
    /// Orders resolved to completion.
    pub completed: u64,
    /// Orders resolved to cancellation.
    pub canceled: u64,
    /// Orders left pending (gateway pending, unknown, or unavailable).
    pub left_pending: u64,
}

/// The recovery loop.
pub struct PaymentRecovery<S> {
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    hub: Arc<EventHub>,
    interval: Duration,
}

impl<S> PaymentRecovery<S>
where
    S: PurchaseStore + OrderReader,
{
    /// Create the loop.
    #[must_use]
    pub const fn new(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        hub: Arc<EventHub>,
        interval: Duration,
    ) -> Self {
        Self { store, gateway, hub, interval }
    }

    /// Run one reconciliation pass over all Pending orders.
    pub async fn reconcile_once(&self) -> RecoveryStats {
        let pending = match self.store.pending_orders().await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::error!(%error, "could not list pending orders, skipping this cycle");
                return RecoveryStats::default();
            }
        };

        let mut stats = RecoveryStats { examined: pending.len() as u64, ..Default::default() };
        for order in pending {
            let order_id = order.id;
            match self.reconcile_order(&order).await {
                Ok(Resolution::Completed) => stats.completed += 1,
                Ok(Resolution::Canceled) => stats.canceled += 1,
                Ok(Resolution::LeftPending) => stats.left_pending += 1,
                Err(error) => {
                    stats.left_pending += 1;
                    tracing::error!(%order_id, %error, "reconciliation failed for order");
                }
            }
        }

        if stats.completed > 0 || stats.canceled > 0 {
            tracing::info!(
                examined = stats.examined,
                completed = stats.completed,
                canceled = stats.canceled,
                "payment recovery pass resolved orders"
            );
        }
        stats
    }

    async fn reconcile_order(&self, order: &Order) -> Result<Resolution, CommerceError> {
        let external_user_id = self.store.external_user_id(order.user_id).await?;
        let reply = self
            .gateway
            .transactions_by_order(&external_user_id, order.id)
            .await?;

        let transactions = match reply {
            GatewayReply::Answered(transactions) => transactions,
            GatewayReply::Unavailable => {
                tracing::debug!(order_id = %order.id, "gateway unavailable, skipping this cycle");
                return Ok(Resolution::LeftPending);
            }
        };

        // A success anywhere wins; otherwise a decline resolves the order;
        // anything else stays pending for the next cycle.
        let success = transactions.iter().find(|t| t.status == GatewayStatus::Success);
        let failure = transactions.iter().find(|t| t.status == GatewayStatus::Failed);

        let event = if let Some(success) = success {
            DomainEvent::PaymentCompleted(PaymentCompleted {
                order_id: order.id,
                transaction_key: Some(success.transaction_key.clone()),
                occurred_at: Utc::now(),
            })
        } else if let Some(failure) = failure {
            DomainEvent::PaymentFailed(PaymentFailed {
                order_id: order.id,
                refund_points: order.used_points,
                reason: failure.reason.clone(),
                occurred_at: Utc::now(),
            })
        } else {
            return Ok(Resolution::LeftPending);
        };

        let resolution = match &event {
            DomainEvent::PaymentCompleted(_) => Resolution::Completed,
            _ => Resolution::Canceled,
        };

        // Scheduler path: waiting for the handlers keeps the cycle bounded
        // and makes a pass observable end-to-end.
        self.hub.dispatch(vec![event]).await.settled().await;
        Ok(resolution)
    }

    /// Run the loop on its interval until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let recovery = Arc::clone(&self);
        scheduler::run_every("payment-recovery", self.interval, shutdown, move || {
            let recovery = Arc::clone(&recovery);
            async move {
                let _ = recovery.reconcile_once().await;
            }
        })
        .await;
    }
}

enum Resolution {
    Completed,
    Canceled,
    LeftPending,
}
