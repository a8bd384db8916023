//! # Commerce Ranking
//!
//! The event-driven product ranking pipeline and its query side:
//!
//! - [`scorer`]: bus consumer converting order/like/view events into
//!   weighted sorted-set increments, deduped through the idempotency ledger
//!   and coalesced per product
//! - [`carry_over`]: midnight task seeding today's set with a fraction of
//!   yesterday's scores
//! - [`snapshot_writer`]: periodic persisted top-K for disaster fallback
//! - [`query`]: paged reads with the live → snapshot → previous snapshot →
//!   like-count degradation ladder
//! - [`catalog`]: batch product hydration through the KV cache
//! - [`keys`], [`score`]: key format and scoring weights

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod carry_over;
pub mod catalog;
pub mod keys;
pub mod query;
pub mod score;
pub mod scorer;
pub mod snapshot_writer;

pub use carry_over::RankingCarryOver;
pub use catalog::CatalogHydrator;
pub use query::RankingQueryService;
pub use scorer::RankingScorer;
pub use snapshot_writer::SnapshotWriter;
