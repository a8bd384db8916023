//! Row shapes, status codecs, and driver error mapping shared by the stores.

use chrono::{DateTime, Utc};
use commerce_core::domain::{
    Brand, Discount, Order, OrderItem, OrderStatus, Payment, PaymentStatus, Product, User,
};
use commerce_core::error::StoreError;
use commerce_core::ids::{BrandId, EventId, OrderId, PaymentId, ProductId, UserId};
use commerce_core::store::{OutboxEvent, OutboxStatus};
use uuid::Uuid;

/// Translate a driver error into store semantics. Unique violations and lock
/// waits get their own variants so the domain layer can react to them.
pub(crate) fn map_db_err(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            return StoreError::DuplicateKey(db.to_string());
        }
        // 55P03 lock_not_available, 40001 serialization_failure, 40P01 deadlock_detected
        if matches!(db.code().as_deref(), Some("55P03" | "40001" | "40P01")) {
            return StoreError::LockTimeout(db.to_string());
        }
    }
    StoreError::Database(error.to_string())
}

pub(crate) const fn order_status_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "PENDING",
        OrderStatus::Completed => "COMPLETED",
        OrderStatus::Canceled => "CANCELED",
    }
}

pub(crate) fn parse_order_status(raw: &str) -> Result<OrderStatus, StoreError> {
    match raw {
        "PENDING" => Ok(OrderStatus::Pending),
        "COMPLETED" => Ok(OrderStatus::Completed),
        "CANCELED" => Ok(OrderStatus::Canceled),
        other => Err(StoreError::Database(format!("unknown order status {other:?}"))),
    }
}

pub(crate) const fn payment_status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "PENDING",
        PaymentStatus::Success => "SUCCESS",
        PaymentStatus::Failed => "FAILED",
    }
}

pub(crate) fn parse_payment_status(raw: &str) -> Result<PaymentStatus, StoreError> {
    match raw {
        "PENDING" => Ok(PaymentStatus::Pending),
        "SUCCESS" => Ok(PaymentStatus::Success),
        "FAILED" => Ok(PaymentStatus::Failed),
        other => Err(StoreError::Database(format!("unknown payment status {other:?}"))),
    }
}

pub(crate) fn parse_outbox_status(raw: &str) -> Result<OutboxStatus, StoreError> {
    match raw {
        "PENDING" => Ok(OutboxStatus::Pending),
        "PUBLISHED" => Ok(OutboxStatus::Published),
        "FAILED" => Ok(OutboxStatus::Failed),
        other => Err(StoreError::Database(format!("unknown outbox status {other:?}"))),
    }
}

pub(crate) fn discount_from_columns(kind: &str, value: i64) -> Result<Discount, StoreError> {
    match kind {
        "FIXED" => Ok(Discount::Fixed(value)),
        "PERCENTAGE" => Ok(Discount::Percentage(value)),
        other => Err(StoreError::Database(format!("unknown discount type {other:?}"))),
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: i64,
    pub external_user_id: String,
    pub email: String,
    pub point_balance: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId(row.id),
            external_user_id: row.external_user_id,
            email: row.email,
            point_balance: row.point_balance,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ProductRow {
    pub id: i64,
    pub brand_id: i64,
    pub name: String,
    pub price: i64,
    pub stock: i64,
    pub like_count: i64,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: ProductId(row.id),
            brand_id: BrandId(row.brand_id),
            name: row.name,
            price: row.price,
            stock: row.stock,
            like_count: row.like_count,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct BrandRow {
    pub id: i64,
    pub name: String,
}

impl From<BrandRow> for Brand {
    fn from(row: BrandRow) -> Self {
        Self { id: BrandId(row.id), name: row.name }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct OrderRow {
    pub id: i64,
    pub user_id: i64,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub used_points: i64,
    pub total_amount: i64,
    pub coupon_code: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct OrderItemRow {
    pub product_id: i64,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i64,
}

pub(crate) fn assemble_order(row: OrderRow, items: Vec<OrderItemRow>) -> Result<Order, StoreError> {
    Ok(Order {
        id: OrderId(row.id),
        user_id: UserId(row.user_id),
        items: items
            .into_iter()
            .map(|item| OrderItem {
                product_id: ProductId(item.product_id),
                name: item.name,
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect(),
        subtotal: row.subtotal,
        discount_amount: row.discount_amount,
        used_points: row.used_points,
        total_amount: row.total_amount,
        coupon_code: row.coupon_code,
        status: parse_order_status(&row.status)?,
        created_at: row.created_at,
    })
}

#[derive(sqlx::FromRow)]
pub(crate) struct PaymentRow {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub card_type: String,
    pub transaction_key: Option<String>,
    pub status: String,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: PaymentId(row.id),
            order_id: OrderId(row.order_id),
            user_id: UserId(row.user_id),
            amount: row.amount,
            card_type: row.card_type,
            transaction_key: row.transaction_key,
            status: parse_payment_status(&row.status)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct OutboxRow {
    pub id: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: i64,
    pub topic: String,
    pub partition_key: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id,
            event_id: EventId(row.event_id),
            event_type: row.event_type,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            version: row.version,
            topic: row.topic,
            partition_key: row.partition_key,
            payload: row.payload,
            status: parse_outbox_status(&row.status)?,
            created_at: row.created_at,
            published_at: row.published_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codecs_round_trip() {
        for status in [OrderStatus::Pending, OrderStatus::Completed, OrderStatus::Canceled] {
            assert_eq!(parse_order_status(order_status_str(status)).ok(), Some(status));
        }
        for status in [PaymentStatus::Pending, PaymentStatus::Success, PaymentStatus::Failed] {
            assert_eq!(parse_payment_status(payment_status_str(status)).ok(), Some(status));
        }
        assert!(parse_order_status("UNKNOWN").is_err());
    }

    #[test]
    fn discount_columns_map_to_variants() {
        assert_eq!(discount_from_columns("FIXED", 500).ok(), Some(Discount::Fixed(500)));
        assert_eq!(
            discount_from_columns("PERCENTAGE", 10).ok(),
            Some(Discount::Percentage(10))
        );
        assert!(discount_from_columns("BOGOF", 1).is_err());
    }
}
