//! User aggregate: identity and point balance.

use crate::error::CommerceError;
use crate::ids::UserId;
use serde::{Deserialize, Serialize};

/// A registered user.
///
/// `point_balance` is mutated only while the user's row lock is held inside a
/// purchase or compensation transaction, so the non-negative invariant is
/// checked here and enforced by serialization at the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Surrogate key.
    pub id: UserId,
    /// Stable identity used by external systems (payment gateway header).
    pub external_user_id: String,
    /// Contact address.
    pub email: String,
    /// Spendable points, always non-negative.
    pub point_balance: i64,
}

impl User {
    /// Debit points for an order.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::InsufficientPoints`] when the balance cannot
    /// cover the debit, and [`CommerceError::Validation`] for a negative
    /// amount.
    pub fn debit_points(&mut self, amount: i64) -> Result<(), CommerceError> {
        if amount < 0 {
            return Err(CommerceError::Validation(format!(
                "point debit must not be negative, got {amount}"
            )));
        }
        if amount > self.point_balance {
            return Err(CommerceError::InsufficientPoints {
                requested: amount,
                balance: self.point_balance,
            });
        }
        self.point_balance -= amount;
        Ok(())
    }

    /// Credit points back, used by compensation after a failed payment.
    pub fn credit_points(&mut self, amount: i64) {
        self.point_balance += amount;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn user(balance: i64) -> User {
        User {
            id: UserId(1),
            external_user_id: "u-ext-1".into(),
            email: "u1@example.com".into(),
            point_balance: balance,
        }
    }

    #[test]
    fn debit_within_balance() {
        let mut u = user(10_000);
        u.debit_points(1_000).unwrap();
        assert_eq!(u.point_balance, 9_000);
    }

    #[test]
    fn debit_over_balance_is_terminal() {
        let mut u = user(500);
        let err = u.debit_points(1_000).unwrap_err();
        assert!(matches!(
            err,
            CommerceError::InsufficientPoints { requested: 1_000, balance: 500 }
        ));
        assert_eq!(u.point_balance, 500);
    }

    #[test]
    fn credit_restores_debit() {
        let mut u = user(1_000);
        u.debit_points(1_000).unwrap();
        u.credit_points(1_000);
        assert_eq!(u.point_balance, 1_000);
    }
}
