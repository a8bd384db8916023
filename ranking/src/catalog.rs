//! Catalog hydration with a read-through JSON cache.
//!
//! Ranking pages, snapshots, and order scoring all need product detail for a
//! set of product ids. Lookups go through the KV cache first; misses are
//! batch-loaded from the catalog (one query for products, one for brands)
//! and written back. A cache outage degrades to direct reads, never to a
//! failure.

use commerce_core::domain::ProductSummary;
use commerce_core::error::StoreError;
use commerce_core::ids::{BrandId, ProductId};
use commerce_core::store::{CatalogReader, KVCache};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Batch product-detail loader with cache-aside reads.
pub struct CatalogHydrator<C, K> {
    catalog: Arc<C>,
    cache: Arc<K>,
    cache_ttl: Duration,
}

impl<C, K> CatalogHydrator<C, K>
where
    C: CatalogReader,
    K: KVCache,
{
    /// Create a hydrator. `cache_ttl` bounds how stale a hot read may be.
    #[must_use]
    pub const fn new(catalog: Arc<C>, cache: Arc<K>, cache_ttl: Duration) -> Self {
        Self { catalog, cache, cache_ttl }
    }

    fn cache_key(id: ProductId) -> String {
        format!("catalog:product:{id}")
    }

    /// Resolve product summaries for `ids`. Unknown products are simply
    /// absent from the result; callers decide whether that is worth a WARN.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] only when the catalog itself fails; cache
    /// failures are logged and bypassed.
    pub async fn summaries(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, ProductSummary>, StoreError> {
        let mut unique: Vec<ProductId> = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut found = HashMap::with_capacity(unique.len());
        let mut misses = Vec::new();

        for id in unique {
            match self.cache.get(&Self::cache_key(id)).await {
                Ok(Some(value)) => match serde_json::from_value::<ProductSummary>(value) {
                    Ok(summary) => {
                        found.insert(id, summary);
                    }
                    Err(error) => {
                        tracing::debug!(product_id = %id, %error, "cached product entry unreadable");
                        misses.push(id);
                    }
                },
                Ok(None) => misses.push(id),
                Err(error) => {
                    tracing::debug!(product_id = %id, %error, "cache read failed, going to catalog");
                    misses.push(id);
                }
            }
        }

        if misses.is_empty() {
            return Ok(found);
        }

        let products = self.catalog.products_by_ids(&misses).await?;
        let brand_ids: Vec<BrandId> = {
            let mut ids: Vec<BrandId> = products.iter().map(|p| p.brand_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let brands: HashMap<BrandId, String> = self
            .catalog
            .brands_by_ids(&brand_ids)
            .await?
            .into_iter()
            .map(|b| (b.id, b.name))
            .collect();

        for product in products {
            let Some(brand_name) = brands.get(&product.brand_id) else {
                tracing::warn!(
                    product_id = %product.id,
                    brand_id = %product.brand_id,
                    "product references a missing brand, skipping"
                );
                continue;
            };
            let summary = ProductSummary {
                id: product.id,
                name: product.name,
                price: product.price,
                brand_id: product.brand_id,
                brand_name: brand_name.clone(),
                like_count: product.like_count,
            };
            match serde_json::to_value(&summary) {
                Ok(value) => {
                    if let Err(error) = self
                        .cache
                        .put(&Self::cache_key(summary.id), &value, self.cache_ttl)
                        .await
                    {
                        tracing::debug!(product_id = %summary.id, %error, "cache write failed");
                    }
                }
                Err(error) => {
                    tracing::debug!(product_id = %summary.id, %error, "summary not serializable");
                }
            }
            found.insert(summary.id, summary);
        }

        Ok(found)
    }

    /// Drop a product from the cache, e.g. after a catalog edit.
    pub async fn evict(&self, id: ProductId) {
        if let Err(error) = self.cache.evict(&Self::cache_key(id)).await {
            tracing::debug!(product_id = %id, %error, "cache evict failed");
        }
    }
}
