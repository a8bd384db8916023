//! Periodic snapshot writer: persists the hydrated top-K of today's ranking
//! so queries survive a Redis outage.

use crate::catalog::CatalogHydrator;
use crate::keys::ranking_key;
use chrono::{NaiveDate, Utc};
use commerce_core::error::StoreError;
use commerce_core::ids::ProductId;
use commerce_core::store::{CatalogReader, KVCache, SnapshotStore, SortedSetStore};
use commerce_core::view::{RankedProduct, RankingSnapshot};
use commerce_runtime::scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Writes one snapshot per interval for the current UTC date. A newer write
/// for the same date supersedes the previous one.
pub struct SnapshotWriter<Z, S, C, K> {
    zset: Arc<Z>,
    snapshots: Arc<S>,
    hydrator: CatalogHydrator<C, K>,
    top_k: u64,
    interval: Duration,
}

impl<Z, S, C, K> SnapshotWriter<Z, S, C, K>
where
    Z: SortedSetStore,
    S: SnapshotStore,
    C: CatalogReader,
    K: KVCache,
{
    /// Create the writer.
    #[must_use]
    pub const fn new(
        zset: Arc<Z>,
        snapshots: Arc<S>,
        hydrator: CatalogHydrator<C, K>,
        top_k: u64,
        interval: Duration,
    ) -> Self {
        Self { zset, snapshots, hydrator, top_k, interval }
    }

    /// Take and persist one snapshot for `date`. Returns the number of
    /// entries persisted.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the sorted set, catalog, or snapshot
    /// store fails; the snapshot for this interval is then skipped.
    pub async fn write_snapshot(&self, date: NaiveDate) -> Result<u64, StoreError> {
        let key = ranking_key(date);
        let stop = i64::try_from(self.top_k).unwrap_or(i64::MAX) - 1;
        let top = self.zset.range_desc(&key, 0, stop).await?;
        let total_size = self.zset.card(&key).await?;

        let ids: Vec<ProductId> = top
            .iter()
            .filter_map(|(member, _)| match member.parse::<i64>() {
                Ok(id) => Some(ProductId(id)),
                Err(_) => {
                    tracing::warn!(%key, member, "non-numeric ranking member skipped");
                    None
                }
            })
            .collect();
        let summaries = self.hydrator.summaries(&ids).await?;

        let mut entries = Vec::with_capacity(top.len());
        for (member, score) in top {
            let Ok(id) = member.parse::<i64>().map(ProductId) else {
                continue;
            };
            match summaries.get(&id) {
                Some(product) => entries.push(RankedProduct {
                    rank: entries.len() as u64 + 1,
                    score,
                    product: product.clone(),
                }),
                None => {
                    tracing::warn!(product_id = %id, "ranked product missing from catalog, not snapshotted");
                }
            }
        }

        let count = entries.len() as u64;
        self.snapshots
            .save(&RankingSnapshot { date, entries, total_size, taken_at: Utc::now() })
            .await?;
        tracing::debug!(%date, entries = count, total_size, "ranking snapshot written");
        Ok(count)
    }

    /// Run on the configured interval until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let writer = Arc::clone(&self);
        let interval = self.interval;
        scheduler::run_every("ranking-snapshot-writer", interval, shutdown, move || {
            let writer = Arc::clone(&writer);
            async move {
                let today = Utc::now().date_naive();
                if let Err(error) = writer.write_snapshot(today).await {
                    tracing::warn!(%today, %error, "snapshot write failed, keeping previous snapshot");
                }
            }
        })
        .await;
    }
}
