//! Ranking snapshot persistence, keyed by date.

use crate::rows::map_db_err;
use crate::store::PgCommerceStore;
use chrono::NaiveDate;
use commerce_core::error::StoreError;
use commerce_core::store::SnapshotStore;
use commerce_core::view::{RankedProduct, RankingSnapshot};
use sqlx::Row;

impl SnapshotStore for PgCommerceStore {
    async fn save(&self, snapshot: &RankingSnapshot) -> Result<(), StoreError> {
        let entries = serde_json::to_value(&snapshot.entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO ranking_snapshots (date, entries, total_size, taken_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (date) DO UPDATE
             SET entries = EXCLUDED.entries,
                 total_size = EXCLUDED.total_size,
                 taken_at = EXCLUDED.taken_at",
        )
        .bind(snapshot.date)
        .bind(&entries)
        .bind(i64::try_from(snapshot.total_size).unwrap_or(i64::MAX))
        .bind(snapshot.taken_at)
        .execute(self.pool())
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get(&self, date: NaiveDate) -> Result<Option<RankingSnapshot>, StoreError> {
        let Some(row) = sqlx::query(
            "SELECT date, entries, total_size, taken_at FROM ranking_snapshots WHERE date = $1",
        )
        .bind(date)
        .fetch_optional(self.pool())
        .await
        .map_err(map_db_err)?
        else {
            return Ok(None);
        };

        let entries_json: serde_json::Value = row.try_get("entries").map_err(map_db_err)?;
        let entries: Vec<RankedProduct> = serde_json::from_value(entries_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let total_size: i64 = row.try_get("total_size").map_err(map_db_err)?;
        Ok(Some(RankingSnapshot {
            date: row.try_get("date").map_err(map_db_err)?,
            entries,
            total_size: u64::try_from(total_size).unwrap_or(0),
            taken_at: row.try_get("taken_at").map_err(map_db_err)?,
        }))
    }
}
