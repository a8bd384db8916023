//! # Commerce Testing
//!
//! Deterministic in-memory implementations of the `commerce-core` store
//! traits, used by unit and scenario tests across the workspace:
//!
//! - [`InMemoryCommerceStore`]: purchase unit of work with per-row lock
//!   semantics, plus order/catalog readers and the outbox store
//! - [`InMemoryStreamingBus`]: backlog-then-live bus with publish failure
//!   injection
//! - [`InMemorySortedSet`], [`InMemoryKVCache`], [`InMemorySnapshotStore`],
//!   [`InMemoryIdempotencyLedger`]: ranking infrastructure with outage
//!   injection
//! - [`MockPaymentGateway`]: scriptable gateway replies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod gateway;
mod ranking;
mod store;

pub use bus::InMemoryStreamingBus;
pub use gateway::{MockPaymentGateway, ScriptedPayment};
pub use ranking::{
    InMemoryIdempotencyLedger, InMemoryKVCache, InMemorySnapshotStore, InMemorySortedSet,
};
pub use store::{InMemoryCommerceStore, InMemoryPurchaseTx};
