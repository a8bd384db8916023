//! Outbox store: the relay's poll-and-mark surface.

use crate::rows::{map_db_err, OutboxRow};
use crate::store::PgCommerceStore;
use chrono::{DateTime, Utc};
use commerce_core::error::StoreError;
use commerce_core::store::{OutboxEvent, OutboxStore};

const POLL_SQL: &str = "SELECT id, event_id, event_type, aggregate_id, aggregate_type, version,
        topic, partition_key, payload, status, created_at, published_at
 FROM outbox_events WHERE status = 'PENDING'
 ORDER BY created_at ASC LIMIT $1";

const POLL_CLAIM_SQL: &str = "SELECT id, event_id, event_type, aggregate_id, aggregate_type, version,
        topic, partition_key, payload, status, created_at, published_at
 FROM outbox_events WHERE status = 'PENDING'
 ORDER BY created_at ASC LIMIT $1
 FOR UPDATE SKIP LOCKED";

impl OutboxStore for PgCommerceStore {
    async fn poll_pending(&self, limit: u32, claim: bool) -> Result<Vec<OutboxEvent>, StoreError> {
        let sql = if claim { POLL_CLAIM_SQL } else { POLL_SQL };
        let rows = sqlx::query_as::<_, OutboxRow>(sql)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_db_err)?;
        rows.into_iter().map(OutboxEvent::try_from).collect()
    }

    async fn mark_published(&self, id: i64, published_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE outbox_events SET status = 'PUBLISHED', published_at = $2 WHERE id = $1")
            .bind(id)
            .bind(published_at)
            .execute(self.pool())
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE outbox_events SET status = 'FAILED' WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_db_err)?;
        Ok(())
    }
}

impl PgCommerceStore {
    /// Operator action: put FAILED rows back on the relay's queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn reset_failed_outbox(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE outbox_events SET status = 'PENDING' WHERE status = 'FAILED'")
            .execute(self.pool())
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }
}
