//! Identifier newtypes shared across the workspace.
//!
//! Database-backed aggregates use `i64` surrogate keys wrapped in dedicated
//! newtypes so a product id can never be passed where an order id is expected.
//! Event identities are random UUIDs minted at emission time.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a [`User`](crate::domain::User) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Identity of a [`Product`](crate::domain::Product) row.
///
/// Ordered so lock acquisition can sort ids ascending before taking row locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

/// Identity of a [`Brand`](crate::domain::Brand) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrandId(pub i64);

/// Identity of an [`Order`](crate::domain::Order) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub i64);

/// Identity of a [`Coupon`](crate::domain::Coupon) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CouponId(pub i64);

/// Identity of a [`Payment`](crate::domain::Payment) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub i64);

/// Unique identity of an emitted domain event.
///
/// Minted once when the event is recorded and carried end-to-end: outbox row,
/// bus message envelope, and consumer idempotency ledger all share this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Mint a fresh random event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! display_as_inner {
    ($($ty:ty),+ $(,)?) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        })+
    };
}

display_as_inner!(UserId, ProductId, BrandId, OrderId, CouponId, PaymentId, EventId);
