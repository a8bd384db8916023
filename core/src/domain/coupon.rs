//! Coupons, per-user coupon holdings, and the discount calculation.

use crate::error::CommerceError;
use crate::ids::{CouponId, UserId};
use serde::{Deserialize, Serialize};

/// Discount shape carried by a coupon.
///
/// A single `apply` function replaces strategy indirection: the variant is the
/// strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Discount {
    /// Subtract a fixed amount, capped at the subtotal.
    Fixed(i64),
    /// Subtract a percentage of the subtotal, rounded half-up. The value is
    /// validated to lie in `1..=100` at creation.
    Percentage(i64),
}

impl Discount {
    /// Compute the discount amount for a subtotal.
    ///
    /// `Fixed(v)` yields `min(v, subtotal)`; `Percentage(v)` yields
    /// `round(subtotal · v / 100)`.
    #[must_use]
    pub fn apply(self, subtotal: i64) -> i64 {
        match self {
            Self::Fixed(v) => v.min(subtotal),
            // Integer half-up rounding of subtotal * v / 100.
            Self::Percentage(v) => (subtotal * v + 50) / 100,
        }
    }

    /// Validate the discount value against its variant's constraints.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::Validation`] for a non-positive value, or a
    /// percentage above 100.
    pub fn validate(self) -> Result<(), CommerceError> {
        match self {
            Self::Fixed(v) if v > 0 => Ok(()),
            Self::Percentage(v) if (1..=100).contains(&v) => Ok(()),
            Self::Fixed(v) => Err(CommerceError::Validation(format!(
                "fixed discount must be positive, got {v}"
            ))),
            Self::Percentage(v) => Err(CommerceError::Validation(format!(
                "percentage discount must be in 1..=100, got {v}"
            ))),
        }
    }
}

/// A coupon definition, identified by its unique code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Surrogate key.
    pub id: CouponId,
    /// Unique redemption code.
    pub code: String,
    /// Discount applied at redemption.
    pub discount: Discount,
}

/// A coupon held by a user; `(user_id, coupon_id)` is unique.
///
/// Redemption uses optimistic concurrency: `version` is compared-and-bumped at
/// save time, so of N concurrent redemptions exactly one observes its loaded
/// version and wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCoupon {
    /// Holder.
    pub user_id: UserId,
    /// The held coupon.
    pub coupon_id: CouponId,
    /// Whether the one permitted use has happened.
    pub is_used: bool,
    /// Optimistic concurrency counter.
    pub version: i64,
}

impl UserCoupon {
    /// Mark the coupon used.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::CouponAlreadyUsed`] when the holding was
    /// consumed before this attempt loaded it.
    pub fn mark_used(&mut self, code: &str) -> Result<(), CommerceError> {
        if self.is_used {
            return Err(CommerceError::CouponAlreadyUsed { code: code.to_owned() });
        }
        self.is_used = true;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fixed_discount_caps_at_subtotal() {
        assert_eq!(Discount::Fixed(1_000).apply(4_000), 1_000);
        assert_eq!(Discount::Fixed(5_000).apply(4_000), 4_000);
    }

    #[test]
    fn percentage_discount_rounds_half_up() {
        assert_eq!(Discount::Percentage(10).apply(4_000), 400);
        // 15 * 333 / 100 = 49.95 -> 50
        assert_eq!(Discount::Percentage(15).apply(333), 50);
        // 10 * 14 / 100 = 1.4 -> 1
        assert_eq!(Discount::Percentage(10).apply(14), 1);
    }

    #[test]
    fn validate_rejects_out_of_range() {
        assert!(Discount::Fixed(0).validate().is_err());
        assert!(Discount::Percentage(0).validate().is_err());
        assert!(Discount::Percentage(101).validate().is_err());
        assert!(Discount::Percentage(100).validate().is_ok());
    }

    #[test]
    fn second_use_is_rejected() {
        let mut uc = UserCoupon {
            user_id: UserId(1),
            coupon_id: CouponId(1),
            is_used: false,
            version: 0,
        };
        uc.mark_used("C1").unwrap();
        assert!(matches!(
            uc.mark_used("C1"),
            Err(CommerceError::CouponAlreadyUsed { .. })
        ));
    }

    proptest! {
        #[test]
        fn discount_never_exceeds_subtotal(subtotal in 0i64..10_000_000, pct in 1i64..=100) {
            let d = Discount::Percentage(pct).apply(subtotal);
            prop_assert!(d <= subtotal);
            prop_assert!(d >= 0);
        }

        #[test]
        fn fixed_discount_is_monotone(subtotal in 0i64..10_000_000, v in 1i64..1_000_000) {
            let d = Discount::Fixed(v).apply(subtotal);
            prop_assert!(d <= subtotal);
            prop_assert!(d <= v);
        }
    }
}
