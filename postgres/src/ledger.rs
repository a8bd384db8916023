//! Consumer-side idempotency ledger over the `events_handled` table.

use crate::rows::map_db_err;
use crate::store::PgCommerceStore;
use commerce_core::error::StoreError;
use commerce_core::ids::EventId;
use commerce_core::store::IdempotencyLedger;

impl IdempotencyLedger for PgCommerceStore {
    async fn record(&self, event_id: EventId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO events_handled (event_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(event_id.0)
        .execute(self.pool())
        .await
        .map_err(map_db_err)?;
        Ok(result.rows_affected() == 1)
    }
}
