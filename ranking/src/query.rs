//! The ranking query service: paged top-K reads with a graceful degradation
//! ladder.
//!
//! ```text
//! 1. live sorted set        (ZREVRANGE WITHSCORES + hydration)
//! 2. snapshot for the date
//! 3. snapshot for the previous date
//! 4. product table ordered by like_count
//! ```
//!
//! Each tier falls through on failure; the service never returns an error to
//! the caller. The page records which tier served it, which both tests and
//! operators lean on.

use crate::catalog::CatalogHydrator;
use crate::keys::{member, ranking_key};
use chrono::{Days, NaiveDate};
use commerce_core::error::StoreError;
use commerce_core::ids::{BrandId, ProductId};
use commerce_core::store::{CatalogReader, KVCache, SnapshotStore, SortedSetStore};
use commerce_core::view::{RankedProduct, RankingPage, RankingSource};
use std::collections::HashMap;
use std::sync::Arc;

/// Paged ranking reads with fallbacks.
pub struct RankingQueryService<Z, S, C, K> {
    zset: Arc<Z>,
    snapshots: Arc<S>,
    catalog: Arc<C>,
    hydrator: CatalogHydrator<C, K>,
}

impl<Z, S, C, K> RankingQueryService<Z, S, C, K>
where
    Z: SortedSetStore,
    S: SnapshotStore,
    C: CatalogReader,
    K: KVCache,
{
    /// Create the service.
    #[must_use]
    pub const fn new(
        zset: Arc<Z>,
        snapshots: Arc<S>,
        catalog: Arc<C>,
        hydrator: CatalogHydrator<C, K>,
    ) -> Self {
        Self { zset, snapshots, catalog, hydrator }
    }

    /// A page of rankings for `date`. Never fails; worst case is an empty
    /// page from the default tier.
    pub async fn get_rankings(&self, date: NaiveDate, page: u64, size: u64) -> RankingPage {
        if size == 0 {
            return RankingPage {
                date,
                entries: Vec::new(),
                page,
                size,
                has_next: false,
                source: RankingSource::Live,
            };
        }

        match self.live_page(date, page, size).await {
            Ok(result) => return result,
            Err(error) => {
                tracing::warn!(%date, %error, "live ranking unavailable, trying snapshot");
            }
        }

        if let Some(result) = self.snapshot_page(date, date, page, size, RankingSource::Snapshot).await {
            return result;
        }
        if let Some(yesterday) = date.checked_sub_days(Days::new(1)) {
            if let Some(result) = self
                .snapshot_page(yesterday, date, page, size, RankingSource::PreviousSnapshot)
                .await
            {
                return result;
            }
        }

        self.default_page(date, page, size).await
    }

    async fn live_page(
        &self,
        date: NaiveDate,
        page: u64,
        size: u64,
    ) -> Result<RankingPage, StoreError> {
        let key = ranking_key(date);
        let start = page * size;
        let stop = i64::try_from(start + size).unwrap_or(i64::MAX) - 1;
        let rows = self
            .zset
            .range_desc(&key, i64::try_from(start).unwrap_or(i64::MAX), stop)
            .await?;
        let cardinality = self.zset.card(&key).await?;

        let ids: Vec<ProductId> = rows
            .iter()
            .filter_map(|(raw, _)| raw.parse::<i64>().ok().map(ProductId))
            .collect();
        let summaries = self.hydrator.summaries(&ids).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (raw, score) in rows {
            let Ok(id) = raw.parse::<i64>().map(ProductId) else {
                tracing::warn!(%key, member = raw, "non-numeric ranking member skipped");
                continue;
            };
            match summaries.get(&id) {
                Some(product) => entries.push(RankedProduct {
                    rank: start + entries.len() as u64 + 1,
                    score,
                    product: product.clone(),
                }),
                None => {
                    tracing::warn!(product_id = %id, "ranked product missing from catalog, skipped");
                }
            }
        }

        Ok(RankingPage {
            date,
            entries,
            page,
            size,
            has_next: start + size < cardinality,
            source: RankingSource::Live,
        })
    }

    async fn snapshot_page(
        &self,
        snapshot_date: NaiveDate,
        requested_date: NaiveDate,
        page: u64,
        size: u64,
        source: RankingSource,
    ) -> Option<RankingPage> {
        let snapshot = match self.snapshots.get(snapshot_date).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(%snapshot_date, %error, "snapshot store unavailable");
                return None;
            }
        };

        let start = usize::try_from(page * size).unwrap_or(usize::MAX);
        let end = start.saturating_add(usize::try_from(size).unwrap_or(usize::MAX));
        let total = snapshot.entries.len();
        let entries = if start >= total {
            Vec::new()
        } else {
            snapshot.entries[start..end.min(total)].to_vec()
        };

        Some(RankingPage {
            date: requested_date,
            entries,
            page,
            size,
            has_next: end < total,
            source,
        })
    }

    /// Last-resort view straight from the product table, ranked by cached
    /// like counts. A failure here yields an empty page, never an error.
    async fn default_page(&self, date: NaiveDate, page: u64, size: u64) -> RankingPage {
        let empty = RankingPage {
            date,
            entries: Vec::new(),
            page,
            size,
            has_next: false,
            source: RankingSource::Default,
        };

        let start = page * size;
        let products = match self.catalog.products_by_like_count(start, size).await {
            Ok(products) => products,
            Err(error) => {
                tracing::error!(%error, "default ranking view failed, returning empty page");
                return empty;
            }
        };
        let total = match self.catalog.product_count().await {
            Ok(total) => total,
            Err(error) => {
                tracing::error!(%error, "product count failed, returning empty page");
                return empty;
            }
        };

        let brand_ids: Vec<BrandId> = {
            let mut ids: Vec<BrandId> = products.iter().map(|p| p.brand_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let brands: HashMap<BrandId, String> = match self.catalog.brands_by_ids(&brand_ids).await {
            Ok(brands) => brands.into_iter().map(|b| (b.id, b.name)).collect(),
            Err(error) => {
                tracing::error!(%error, "brand load failed, returning empty page");
                return empty;
            }
        };

        let mut entries = Vec::with_capacity(products.len());
        for product in products {
            let Some(brand_name) = brands.get(&product.brand_id) else {
                tracing::warn!(product_id = %product.id, "product references a missing brand, skipped");
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            entries.push(RankedProduct {
                rank: start + entries.len() as u64 + 1,
                score: product.like_count as f64,
                product: commerce_core::domain::ProductSummary {
                    id: product.id,
                    name: product.name,
                    price: product.price,
                    brand_id: product.brand_id,
                    brand_name: brand_name.clone(),
                    like_count: product.like_count,
                },
            });
        }

        RankingPage {
            date,
            entries,
            page,
            size,
            has_next: start + size < total,
            source: RankingSource::Default,
        }
    }

    /// 1-based rank of a product for `date`, or `None` when unranked.
    ///
    /// On a sorted-set failure the previous day's set is consulted once;
    /// the rank is never derived from the default view.
    pub async fn get_product_rank(&self, product_id: ProductId, date: NaiveDate) -> Option<u64> {
        let product = member(product_id);
        match self.zset.rank_desc(&ranking_key(date), &product).await {
            Ok(rank) => rank.map(|r| r + 1),
            Err(error) => {
                tracing::warn!(%date, %error, "live rank unavailable, trying previous day");
                let yesterday = date.checked_sub_days(Days::new(1))?;
                match self.zset.rank_desc(&ranking_key(yesterday), &product).await {
                    Ok(rank) => rank.map(|r| r + 1),
                    Err(error) => {
                        tracing::warn!(%yesterday, %error, "previous day rank unavailable");
                        None
                    }
                }
            }
        }
    }
}
