//! The ranking scorer: a streaming-bus consumer turning order, like, and
//! view events into weighted sorted-set increments.
//!
//! # Pipeline
//!
//! ```text
//! order-events ─┐
//! like-events  ─┼─► decode envelope ─► dedup (ledger) ─► buffer deltas
//! product-events┘                                          │
//!                              window full / timer ────────┤
//!                                                          ▼
//!                                       ZINCRBY per product, EXPIRE NX
//! ```
//!
//! # Idempotency
//!
//! Each envelope's event id is recorded in the [`IdempotencyLedger`] before
//! its delta is buffered; a uniqueness conflict means the message was already
//! applied and it is skipped. Replays therefore leave the sorted set exactly
//! as a single delivery would.
//!
//! # Coalescing
//!
//! Deltas accumulate per `(date, product)` inside a small window (bounded by
//! time and message count) and flush as one `ZINCRBY` per product. This is
//! sound because `ZINCRBY` is additive.

use crate::catalog::CatalogHydrator;
use crate::keys::{member, ranking_key, scoring_date};
use crate::score::{order_line_delta, LIKE_DELTA, VIEW_DELTA};
use chrono::NaiveDate;
use commerce_core::config::RankingConfig;
use commerce_core::error::CommerceError;
use commerce_core::event::{topics, EventEnvelope, LikeChanged, OrderCreated, ProductViewed};
use commerce_core::ids::ProductId;
use commerce_core::store::{CatalogReader, IdempotencyLedger, KVCache, SortedSetStore, StreamingBus};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

/// Consumer group under which the scorer reads the event topics.
pub const CONSUMER_GROUP: &str = "ranking-scorer";

#[derive(Default)]
struct ScoreBuffer {
    deltas: HashMap<(NaiveDate, ProductId), f64>,
    messages: usize,
}

/// The ranking scorer.
pub struct RankingScorer<B, L, Z, C, K> {
    bus: Arc<B>,
    ledger: Arc<L>,
    zset: Arc<Z>,
    hydrator: CatalogHydrator<C, K>,
    config: RankingConfig,
    buffer: Mutex<ScoreBuffer>,
}

impl<B, L, Z, C, K> RankingScorer<B, L, Z, C, K>
where
    B: StreamingBus,
    L: IdempotencyLedger,
    Z: SortedSetStore,
    C: CatalogReader,
    K: KVCache,
{
    /// Create a scorer.
    #[must_use]
    pub fn new(
        bus: Arc<B>,
        ledger: Arc<L>,
        zset: Arc<Z>,
        hydrator: CatalogHydrator<C, K>,
        config: RankingConfig,
    ) -> Self {
        Self {
            bus,
            ledger,
            zset,
            hydrator,
            config,
            buffer: Mutex::new(ScoreBuffer::default()),
        }
    }

    /// Compute the deltas an envelope contributes, without side effects.
    ///
    /// Unknown event types contribute nothing. Order items whose product no
    /// longer exists are skipped at WARN, matching the query service's rule
    /// for missing products.
    async fn deltas_for(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Vec<(ProductId, f64)>, CommerceError> {
        let decode_err = |e: serde_json::Error| {
            CommerceError::Validation(format!(
                "malformed {} payload: {e}",
                envelope.event_type
            ))
        };
        match envelope.event_type.as_str() {
            "ProductViewed" => {
                let payload: ProductViewed = envelope.payload_as().map_err(decode_err)?;
                Ok(vec![(payload.product_id, VIEW_DELTA)])
            }
            "LikeAdded" => {
                let payload: LikeChanged = envelope.payload_as().map_err(decode_err)?;
                Ok(vec![(payload.product_id, LIKE_DELTA)])
            }
            "LikeRemoved" => {
                let payload: LikeChanged = envelope.payload_as().map_err(decode_err)?;
                Ok(vec![(payload.product_id, -LIKE_DELTA)])
            }
            "OrderCreated" => {
                let payload: OrderCreated = envelope.payload_as().map_err(decode_err)?;
                let ids: Vec<ProductId> = payload.items.iter().map(|i| i.product_id).collect();
                let summaries = self.hydrator.summaries(&ids).await?;
                let mut deltas = Vec::with_capacity(payload.items.len());
                for item in &payload.items {
                    match summaries.get(&item.product_id) {
                        Some(summary) => deltas
                            .push((item.product_id, order_line_delta(summary.price, item.quantity))),
                        None => {
                            tracing::warn!(
                                product_id = %item.product_id,
                                order_id = %payload.order_id,
                                "ordered product missing from catalog, not scored"
                            );
                        }
                    }
                }
                Ok(deltas)
            }
            other => {
                tracing::trace!(event_type = other, "event type not scored");
                Ok(Vec::new())
            }
        }
    }

    /// Apply one envelope: dedup against the ledger, then buffer its deltas.
    ///
    /// Returns `false` when the envelope was a duplicate or contributes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is malformed, the catalog lookup
    /// fails, or the ledger is unreachable; the envelope is then *not*
    /// recorded as handled, so redelivery retries it.
    pub async fn apply_envelope(&self, envelope: &EventEnvelope) -> Result<bool, CommerceError> {
        let deltas = self.deltas_for(envelope).await?;
        if deltas.is_empty() {
            return Ok(false);
        }

        if !self.ledger.record(envelope.event_id).await? {
            tracing::debug!(event_id = %envelope.event_id, "duplicate event skipped");
            return Ok(false);
        }

        let date = scoring_date(envelope.occurred_at);
        let mut buffer = self.buffer.lock().await;
        for (product_id, delta) in deltas {
            *buffer.deltas.entry((date, product_id)).or_insert(0.0) += delta;
        }
        buffer.messages += 1;
        Ok(true)
    }

    /// Number of messages currently coalesced.
    pub async fn buffered_messages(&self) -> usize {
        self.buffer.lock().await.messages
    }

    /// Flush buffered deltas: one `ZINCRBY` per `(date, product)`, then
    /// `EXPIRE … NX` once per touched key. Increments that fail are put back
    /// so the next flush retries them.
    ///
    /// Returns the number of increments applied.
    pub async fn flush(&self) -> u64 {
        let drained: Vec<((NaiveDate, ProductId), f64)> = {
            let mut buffer = self.buffer.lock().await;
            buffer.messages = 0;
            buffer.deltas.drain().collect()
        };
        if drained.is_empty() {
            return 0;
        }

        let mut applied = 0;
        let mut touched: HashSet<NaiveDate> = HashSet::new();
        let mut retry = Vec::new();
        for ((date, product_id), delta) in drained {
            let key = ranking_key(date);
            match self.zset.incr_score(&key, &member(product_id), delta).await {
                Ok(_) => {
                    applied += 1;
                    touched.insert(date);
                }
                Err(error) => {
                    tracing::warn!(%key, product_id = %product_id, %error, "increment failed, will retry");
                    retry.push(((date, product_id), delta));
                }
            }
        }

        for date in touched {
            let key = ranking_key(date);
            match self.zset.expire_if_absent(&key, self.config.ttl).await {
                Ok(true) => tracing::debug!(%key, "ranking key TTL set"),
                Ok(false) => {}
                Err(error) => tracing::warn!(%key, %error, "failed to ensure ranking TTL"),
            }
        }

        if !retry.is_empty() {
            let mut buffer = self.buffer.lock().await;
            for (slot, delta) in retry {
                *buffer.deltas.entry(slot).or_insert(0.0) += delta;
            }
        }
        applied
    }

    /// Consume the event topics until shutdown, coalescing and flushing.
    ///
    /// # Errors
    ///
    /// Returns an error only when the subscription itself cannot be
    /// established; per-message failures are logged and ride on redelivery.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), CommerceError> {
        let mut stream = self
            .bus
            .subscribe(
                &[topics::ORDER_EVENTS, topics::LIKE_EVENTS, topics::PRODUCT_EVENTS],
                CONSUMER_GROUP,
            )
            .await?;

        let mut ticker = tokio::time::interval(self.config.coalesce_window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(consumer_group = CONSUMER_GROUP, "ranking scorer started");

        loop {
            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(record)) => {
                            match EventEnvelope::decode(&record.payload) {
                                Ok(envelope) => {
                                    if let Err(error) = self.apply_envelope(&envelope).await {
                                        tracing::error!(
                                            event_id = %envelope.event_id,
                                            event_type = %envelope.event_type,
                                            %error,
                                            "failed to apply ranking event"
                                        );
                                    }
                                }
                                Err(error) => {
                                    tracing::warn!(topic = %record.topic, %error, "undecodable record skipped");
                                }
                            }
                            if self.buffered_messages().await >= self.config.coalesce_max_messages {
                                self.flush().await;
                            }
                        }
                        Some(Err(error)) => {
                            tracing::error!(%error, "event stream error");
                        }
                        None => {
                            tracing::info!("event stream ended");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("ranking scorer stopping");
                        break;
                    }
                }
            }
        }

        self.flush().await;
        Ok(())
    }
}
