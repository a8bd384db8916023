//! # Commerce Relay
//!
//! The outbox relay: a single logical worker that polls PENDING outbox rows
//! and forwards them to the streaming bus.
//!
//! ```text
//! ┌──────────────┐  poll (created_at asc)  ┌───────────┐
//! │ outbox table │ ───────────────────────►│   Relay   │
//! └──────────────┘                         └─────┬─────┘
//!        ▲                                       │ publish(key = partition key)
//!        │ mark PUBLISHED / FAILED               ▼
//!        └────────────────────────────────┌───────────┐
//!                                         │ streaming │
//!                                         │    bus    │
//!                                         └───────────┘
//! ```
//!
//! Per-aggregate order is preserved by the ascending `created_at` poll and
//! the bus's per-key partitioning; delivery to the bus is at-least-once, so
//! consumers dedup on the envelope's event id. Rows whose publish is rejected
//! are marked FAILED and left for an operator; the relay never retries them
//! on its own.
//!
//! With more than one replica, enable row claiming
//! (`OUTBOX_ADVISORY_LOCK=true`) so polls use `FOR UPDATE SKIP LOCKED` and
//! replicas do not pick the same batch.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use commerce_core::config::RelayConfig;
use commerce_core::error::StoreError;
use commerce_core::store::{OutboxStore, StreamingBus};
use commerce_runtime::scheduler;
use std::sync::Arc;
use tokio::sync::watch;

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Rows acknowledged by the bus and marked PUBLISHED.
    pub published: u64,
    /// Rows rejected by the bus and marked FAILED.
    pub failed: u64,
}

/// The outbox relay worker.
pub struct OutboxRelay<O, B> {
    outbox: Arc<O>,
    bus: Arc<B>,
    config: RelayConfig,
}

impl<O, B> OutboxRelay<O, B>
where
    O: OutboxStore + 'static,
    B: StreamingBus + 'static,
{
    /// Create a relay over an outbox store and a bus.
    #[must_use]
    pub const fn new(outbox: Arc<O>, bus: Arc<B>, config: RelayConfig) -> Self {
        Self { outbox, bus, config }
    }

    /// Relay one batch: poll, publish each row, mark the outcome.
    ///
    /// One row's failure never stops the batch; it is marked FAILED and the
    /// pass continues.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] only when the poll itself fails; publish and
    /// mark failures are absorbed into the stats.
    pub async fn relay_batch(&self) -> Result<RelayStats, StoreError> {
        let batch = self
            .outbox
            .poll_pending(self.config.batch_size, self.config.claim_rows)
            .await?;

        let mut stats = RelayStats::default();
        for event in batch {
            let payload = match serde_json::to_vec(&event.payload) {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::error!(
                        outbox_id = event.id,
                        event_id = %event.event_id,
                        %error,
                        "outbox payload is not serializable, marking FAILED"
                    );
                    self.mark_failed(event.id).await;
                    stats.failed += 1;
                    continue;
                }
            };

            match self
                .bus
                .publish(&event.topic, &event.partition_key, &payload)
                .await
            {
                Ok(()) => {
                    if let Err(error) = self.outbox.mark_published(event.id, Utc::now()).await {
                        // The publish went through; redelivery after a crash
                        // is covered by consumer-side dedup.
                        tracing::warn!(outbox_id = event.id, %error, "failed to mark row published");
                    }
                    stats.published += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        outbox_id = event.id,
                        event_id = %event.event_id,
                        topic = %event.topic,
                        %error,
                        "publish rejected, marking FAILED"
                    );
                    self.mark_failed(event.id).await;
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn mark_failed(&self, id: i64) {
        if let Err(error) = self.outbox.mark_failed(id).await {
            tracing::error!(outbox_id = id, %error, "failed to mark outbox row FAILED");
        }
    }

    /// Run the relay loop until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let period = self.config.poll_interval;
        let relay = Arc::clone(&self);
        scheduler::run_every("outbox-relay", period, shutdown, move || {
            let relay = Arc::clone(&relay);
            async move {
                match relay.relay_batch().await {
                    Ok(stats) if stats.published > 0 || stats.failed > 0 => {
                        tracing::debug!(
                            published = stats.published,
                            failed = stats.failed,
                            "relay pass finished"
                        );
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::error!(%error, "relay poll failed");
                    }
                }
            }
        })
        .await;
    }
}
