//! Payment aggregate, created alongside its order at saga start.

use crate::ids::{OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

/// Outcome of a payment attempt as known to this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Requested or in flight at the gateway.
    Pending,
    /// Confirmed by the gateway.
    Success,
    /// Rejected by the gateway.
    Failed,
}

/// A payment record, one per order.
///
/// Created in the purchase transaction with [`PaymentStatus::Pending`] and
/// resolved later by the gateway response or the recovery loop. References its
/// order by id only; cancellation of the order does not cascade here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Surrogate key.
    pub id: PaymentId,
    /// The order being paid for. Unique.
    pub order_id: OrderId,
    /// The paying user.
    pub user_id: UserId,
    /// Amount charged, equals the order's `total_amount`.
    pub amount: i64,
    /// Card network or issuer label passed through to the gateway.
    pub card_type: String,
    /// Gateway transaction handle once one exists.
    pub transaction_key: Option<String>,
    /// Current status.
    pub status: PaymentStatus,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&PaymentStatus::Success).unwrap();
        assert_eq!(json, r#""SUCCESS""#);
    }
}
