//! Scoring weights for ranking events.
//!
//! | event | delta per product |
//! |---|---|
//! | `ProductViewed` | +0.1 |
//! | `LikeAdded` | +0.2 |
//! | `LikeRemoved` | −0.2 |
//! | `OrderCreated` (per item) | `ln(1 + price·quantity) · 0.6` |
//!
//! The order score is logarithmic in the line total so a single expensive
//! order cannot bury everything else, and is always positive for a positive
//! line total.

/// Score delta for one product view.
pub const VIEW_DELTA: f64 = 0.1;

/// Score delta for a like; removal applies the negative.
pub const LIKE_DELTA: f64 = 0.2;

/// Weight applied to the log-scaled order line total.
pub const ORDER_WEIGHT: f64 = 0.6;

/// Score delta for one order line: `ln(1 + price·quantity) · 0.6`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn order_line_delta(unit_price: i64, quantity: i64) -> f64 {
    let line_total = (unit_price * quantity).max(0) as f64;
    (1.0 + line_total).ln() * ORDER_WEIGHT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_delta_grows_with_line_total() {
        let small = order_line_delta(1_000, 1);
        let large = order_line_delta(1_000, 10);
        assert!(large > small);
        assert!(small > 0.0);
    }

    #[test]
    fn order_delta_matches_formula() {
        let delta = order_line_delta(2_000, 2);
        let expected = (1.0 + 4_000.0_f64).ln() * 0.6;
        assert!((delta - expected).abs() < 1e-12);
    }

    #[test]
    fn order_delta_is_log_scaled() {
        // Ten times the money is far less than ten times the score.
        let base = order_line_delta(1_000, 1);
        let tenfold = order_line_delta(10_000, 1);
        assert!(tenfold < base * 2.0);
    }

    #[test]
    fn zero_line_total_scores_zero() {
        assert!(order_line_delta(0, 0).abs() < f64::EPSILON);
    }
}
