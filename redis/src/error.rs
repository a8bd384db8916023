//! Redis error translation.

use commerce_core::error::StoreError;

/// Map a Redis driver error into store semantics. Connection-level failures
/// become [`StoreError::Unavailable`] so the ranking query service can walk
/// its degradation ladder; everything else is a plain database error.
pub(crate) fn map_redis_err(error: redis::RedisError) -> StoreError {
    if error.is_connection_refusal() || error.is_timeout() || error.is_connection_dropped() {
        StoreError::Unavailable(error.to_string())
    } else {
        StoreError::Database(error.to_string())
    }
}
