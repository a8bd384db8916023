//! # Commerce Postgres
//!
//! PostgreSQL implementations of the `commerce-core` store traits over sqlx:
//!
//! - [`PgCommerceStore`]: purchase unit of work with `FOR UPDATE` row locks
//!   and a per-transaction lock-wait budget, plus the pool-level order,
//!   catalog, outbox, ledger, and snapshot stores
//! - embedded SQL migrations under `migrations/`
//!
//! Queries use the runtime sqlx API (not the compile-time checked macros) so
//! the workspace builds without a reachable database.
//!
//! Integration tests live in `tests/` and are `#[ignore]`d; they need a
//! running PostgreSQL (`docker run -d -p 5432:5432 -e POSTGRES_PASSWORD=commerce postgres:16`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ledger;
mod like_count;
mod outbox;
mod readers;
mod rows;
mod snapshot;
mod store;

pub use store::{PgCommerceStore, PgPurchaseTx};
