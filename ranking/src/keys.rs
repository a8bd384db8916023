//! Ranking key format: `ranking:all:YYYYMMDD`, dated in UTC.

use chrono::{DateTime, NaiveDate, Utc};

/// Redis key for one day's ranking sorted set.
#[must_use]
pub fn ranking_key(date: NaiveDate) -> String {
    format!("ranking:all:{}", date.format("%Y%m%d"))
}

/// The ranking date an event belongs to: its occurrence instant in UTC.
#[must_use]
pub fn scoring_date(occurred_at: DateTime<Utc>) -> NaiveDate {
    occurred_at.date_naive()
}

/// Sorted-set member for a product: its decimal id.
#[must_use]
pub fn member(product_id: commerce_core::ids::ProductId) -> String {
    product_id.to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use commerce_core::ids::ProductId;

    #[test]
    fn key_uses_compact_utc_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(ranking_key(date), "ranking:all:20250307");
    }

    #[test]
    fn scoring_date_is_utc_calendar_date() {
        let instant = Utc.with_ymd_and_hms(2025, 3, 7, 23, 59, 59).unwrap();
        assert_eq!(scoring_date(instant), NaiveDate::from_ymd_opt(2025, 3, 7).unwrap());
    }

    #[test]
    fn member_is_decimal_id() {
        assert_eq!(member(ProductId(42)), "42");
    }
}
