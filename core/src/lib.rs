//! # Commerce Core
//!
//! Domain model, events, store traits, and the in-process event hub for the
//! transactional core of the e-commerce platform.
//!
//! This crate owns the language of the system and none of its infrastructure:
//!
//! - [`domain`]: aggregates (user, product, coupon, order, payment) and
//!   their business rules
//! - [`event`]: domain events, the JSON wire envelope, topic routing
//! - [`bus`]: transaction-scoped event collector, the outbox bridge, and the
//!   after-commit worker pool
//! - [`store`]: thin traits at every seam: purchase unit of work, catalog
//!   and order reads, outbox, idempotency ledger, sorted set, KV cache,
//!   streaming bus, payment gateway
//! - [`view`]: ranking page and snapshot shapes
//! - [`error`]: the error taxonomy with dispositions
//! - [`config`]: environment-driven configuration
//!
//! Production implementations live in `commerce-postgres`, `commerce-redis`,
//! and `commerce-redpanda`; deterministic fakes live in `commerce-testing`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod event;
pub mod ids;
pub mod store;
pub mod view;

pub use error::{BusError, CommerceError, ErrorKind, StoreError};
pub use ids::{BrandId, CouponId, EventId, OrderId, PaymentId, ProductId, UserId};
