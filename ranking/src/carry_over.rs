//! Daily carry-over: a fraction of yesterday's scores seeds today's set so
//! the ranking does not cold-start at midnight.

use crate::keys::ranking_key;
use chrono::{Days, NaiveDate};
use commerce_core::error::StoreError;
use commerce_core::store::SortedSetStore;
use commerce_runtime::scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// The midnight carry-over task.
///
/// Applying the carry-over twice for one date doubles the bias, so the task
/// remembers the last date it carried within this process and refuses a
/// same-date rerun. Operators must not re-run it manually for a date either.
pub struct RankingCarryOver<Z> {
    zset: Arc<Z>,
    weight: f64,
    ttl: Duration,
    last_carried: Mutex<Option<NaiveDate>>,
}

impl<Z> RankingCarryOver<Z>
where
    Z: SortedSetStore,
{
    /// Create the task. `weight` is the fraction of yesterday's score carried
    /// into today (0.1 by default in configuration).
    #[must_use]
    pub fn new(zset: Arc<Z>, weight: f64, ttl: Duration) -> Self {
        Self {
            zset,
            weight,
            ttl,
            last_carried: Mutex::new(None),
        }
    }

    /// Carry yesterday's scores into `today`. Returns the number of members
    /// carried.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the sorted set is unreachable; the day's
    /// carry is then skipped and the next midnight runs independently.
    pub async fn carry_into(&self, today: NaiveDate) -> Result<u64, StoreError> {
        let mut last_carried = self.last_carried.lock().await;
        if *last_carried == Some(today) {
            tracing::warn!(%today, "carry-over already ran for this date, refusing rerun");
            return Ok(0);
        }

        let Some(yesterday) = today.checked_sub_days(Days::new(1)) else {
            return Ok(0);
        };

        let source = ranking_key(yesterday);
        let dest = ranking_key(today);
        let entries = self.zset.range_desc(&source, 0, -1).await?;

        for (product, score) in &entries {
            self.zset
                .incr_score(&dest, product, score * self.weight)
                .await?;
        }
        if !entries.is_empty() {
            match self.zset.expire_if_absent(&dest, self.ttl).await {
                Ok(_) => {}
                Err(error) => tracing::warn!(key = %dest, %error, "failed to ensure TTL after carry-over"),
            }
        }

        *last_carried = Some(today);
        tracing::info!(%today, carried = entries.len(), weight = self.weight, "carry-over finished");
        Ok(entries.len() as u64)
    }

    /// Run at every UTC midnight until shutdown. Failures are logged and the
    /// date is skipped; the next day's cycle is independent.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let task = Arc::clone(&self);
        scheduler::run_daily_at_utc_midnight("ranking-carry-over", shutdown, move |date| {
            let task = Arc::clone(&task);
            async move {
                if let Err(error) = task.carry_into(date).await {
                    tracing::error!(%date, %error, "carry-over failed, skipping this date");
                }
            }
        })
        .await;
    }
}
