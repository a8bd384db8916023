//! Error taxonomy for the commerce core.
//!
//! Errors are grouped by *disposition* rather than by origin: the embedding
//! service maps [`ErrorKind`] to a transport status, the purchasing
//! orchestrator uses it to decide whether a failed attempt may be retried, and
//! consumers use it to decide whether redelivery is worth anything.
//!
//! | kind | disposition |
//! |---|---|
//! | [`ErrorKind::Validation`] | caller bug, 400-class, never retried |
//! | [`ErrorKind::NotFound`] | 404-class |
//! | [`ErrorKind::ConflictRetryable`] | lock wait / version clash, retried twice with jitter, then 409 |
//! | [`ErrorKind::ConflictTerminal`] | insufficient stock/points, used coupon: surfaced immediately |
//! | [`ErrorKind::GatewayTransient`] | 5xx / timeout, retried on scheduler paths only |
//! | [`ErrorKind::GatewayPermanent`] | 4xx from the gateway, a request bug |
//! | [`ErrorKind::Internal`] | storage or bus infrastructure failure |

use crate::ids::ProductId;
use thiserror::Error;

/// Coarse classification of a [`CommerceError`], used for status mapping and
/// retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or semantically invalid request input.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
    /// A concurrency failure that may succeed on retry.
    ConflictRetryable,
    /// A business conflict that no amount of retrying will fix.
    ConflictTerminal,
    /// The payment gateway failed in a way that may heal itself.
    GatewayTransient,
    /// The payment gateway rejected the request outright.
    GatewayPermanent,
    /// Infrastructure failure (database, cache, bus).
    Internal,
}

/// Failures raised by storage implementations.
///
/// Store implementations translate driver errors into these variants so the
/// domain layer can react to *semantics* (a lock timed out, a unique key
/// collided) without knowing which driver produced them.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection or query failure.
    #[error("database error: {0}")]
    Database(String),

    /// Waiting for a row lock exceeded the pool's lock-wait budget.
    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    /// An optimistic version check found a newer row version.
    #[error("version conflict: {0}")]
    VersionConflict(String),

    /// A unique constraint rejected an insert.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing service is unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures raised by the streaming bus.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the bus.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a record to a topic.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that rejected the record.
        topic: String,
        /// Why the publish failed.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics requested.
        topics: Vec<String>,
        /// Why the subscription failed.
        reason: String,
    },

    /// A received record could not be decoded.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport failure.
    #[error("transport error: {0}")]
    TransportError(String),
}

/// The unified error type of the commerce core.
#[derive(Error, Debug)]
pub enum CommerceError {
    /// Request input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"user"` or `"product"`.
        entity: &'static str,
        /// Stringified identifier that was looked up.
        id: String,
    },

    /// Concurrency failure worth retrying (lock wait timeout, version clash
    /// outside the coupon path).
    #[error("retryable conflict: {0}")]
    RetryableConflict(String),

    /// The product cannot cover the requested quantity.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Product that ran short.
        product_id: ProductId,
        /// Quantity the order asked for.
        requested: i64,
        /// Quantity actually available.
        available: i64,
    },

    /// The user's point balance cannot cover the requested debit.
    #[error("insufficient points: requested {requested}, balance {balance}")]
    InsufficientPoints {
        /// Points the order tried to spend.
        requested: i64,
        /// The user's current balance.
        balance: i64,
    },

    /// The coupon was already consumed before this attempt started.
    #[error("coupon {code} already used")]
    CouponAlreadyUsed {
        /// Coupon code.
        code: String,
    },

    /// A concurrent redemption won the optimistic version race.
    #[error("coupon {code} was redeemed concurrently")]
    CouponRaceLost {
        /// Coupon code.
        code: String,
    },

    /// Discount plus points exceeded the order subtotal.
    #[error("order total must not be negative, got {0}")]
    InvalidAmount(i64),

    /// The payment gateway is unreachable or its circuit is open; payment
    /// state is unknown and the order must not be canceled.
    #[error("payment gateway unavailable")]
    GatewayUnavailable,

    /// The payment gateway rejected the request with a client error.
    #[error("payment gateway rejected the request: status {status}")]
    GatewayRejected {
        /// HTTP status returned by the gateway.
        status: u16,
    },

    /// Storage infrastructure failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Streaming bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl CommerceError {
    /// Classify this error for status mapping and retry decisions.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidAmount(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::RetryableConflict(_) => ErrorKind::ConflictRetryable,
            Self::InsufficientStock { .. }
            | Self::InsufficientPoints { .. }
            | Self::CouponAlreadyUsed { .. }
            | Self::CouponRaceLost { .. } => ErrorKind::ConflictTerminal,
            Self::GatewayUnavailable => ErrorKind::GatewayTransient,
            Self::GatewayRejected { .. } => ErrorKind::GatewayPermanent,
            Self::Store(_) | Self::Bus(_) => ErrorKind::Internal,
        }
    }

    /// Whether the purchasing orchestrator may re-run the transaction.
    #[must_use]
    pub const fn is_retryable_conflict(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConflictRetryable)
    }
}

/// Map a store failure observed inside a purchase transaction onto the
/// orchestrator-facing taxonomy: lock waits and version clashes become
/// retryable conflicts, everything else stays an internal store error.
impl StoreError {
    /// Lift this store error into a [`CommerceError`], promoting concurrency
    /// failures to [`CommerceError::RetryableConflict`].
    #[must_use]
    pub fn into_conflict_aware(self) -> CommerceError {
        match self {
            Self::LockTimeout(msg) | Self::VersionConflict(msg) => {
                CommerceError::RetryableConflict(msg)
            }
            other => CommerceError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_conflicts_are_not_retryable() {
        let err = CommerceError::InsufficientStock {
            product_id: ProductId(1),
            requested: 3,
            available: 1,
        };
        assert_eq!(err.kind(), ErrorKind::ConflictTerminal);
        assert!(!err.is_retryable_conflict());
    }

    #[test]
    fn lock_timeout_promotes_to_retryable() {
        let err = StoreError::LockTimeout("products row 7".into()).into_conflict_aware();
        assert!(err.is_retryable_conflict());
    }

    #[test]
    fn duplicate_key_stays_internal() {
        let err = StoreError::DuplicateKey("outbox".into()).into_conflict_aware();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
