//! Periodic rebuild of the denormalized `products.like_count` column.
//!
//! This batch is the only writer of that column; event handlers never touch
//! it, so the cache converges on the likes table without a second writer to
//! drift against.

use crate::rows::map_db_err;
use crate::store::PgCommerceStore;
use commerce_core::error::StoreError;

impl PgCommerceStore {
    /// Recompute `like_count` for every product whose cached value drifted.
    ///
    /// Returns the number of products corrected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn rebuild_like_counts(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE products p
             SET like_count = sub.cnt
             FROM (
                 SELECT p2.id, COALESCE(l.cnt, 0) AS cnt
                 FROM products p2
                 LEFT JOIN (
                     SELECT product_id, COUNT(*) AS cnt FROM likes GROUP BY product_id
                 ) l ON l.product_id = p2.id
             ) sub
             WHERE p.id = sub.id AND p.like_count IS DISTINCT FROM sub.cnt",
        )
        .execute(self.pool())
        .await
        .map_err(map_db_err)?;

        let corrected = result.rows_affected();
        if corrected > 0 {
            tracing::info!(corrected, "like counts rebuilt");
        }
        Ok(corrected)
    }
}
