//! Read-side view types for the ranking service.

use crate::domain::ProductSummary;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Which tier of the degradation ladder produced a ranking page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RankingSource {
    /// Served from the live sorted set.
    Live,
    /// Served from the requested date's snapshot.
    Snapshot,
    /// Served from the previous day's snapshot.
    PreviousSnapshot,
    /// Served from the product table ordered by like count.
    Default,
}

/// One ranked product with its position and score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedProduct {
    /// 1-based rank.
    pub rank: u64,
    /// Accumulated score (like count on the default tier).
    pub score: f64,
    /// Hydrated product detail.
    pub product: ProductSummary,
}

/// A page of rankings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingPage {
    /// The ranking date requested.
    pub date: NaiveDate,
    /// Entries in rank order.
    pub entries: Vec<RankedProduct>,
    /// Zero-based page index.
    pub page: u64,
    /// Page size requested.
    pub size: u64,
    /// Whether another page exists.
    pub has_next: bool,
    /// Which tier served the page.
    pub source: RankingSource,
}

/// Persisted top-K copy of one day's ranking, used when Redis is unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingSnapshot {
    /// Ranking date.
    pub date: NaiveDate,
    /// Top-K entries in rank order.
    pub entries: Vec<RankedProduct>,
    /// Cardinality of the live set when the snapshot was taken.
    pub total_size: u64,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}
