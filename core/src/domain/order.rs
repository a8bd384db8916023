//! Order aggregate: line items, money fields, and the status state machine.

use crate::error::CommerceError;
use crate::ids::{OrderId, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an order.
///
/// The states form a DAG with two terminal states:
///
/// ```text
/// Pending ──► Completed   (payment succeeded)
///    └──────► Canceled    (payment failed, recovery gave up, or user cancel)
/// ```
///
/// No transition leaves a terminal state; handlers observing a terminal order
/// treat the event as already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, payment outcome unknown.
    Pending,
    /// Payment confirmed. Terminal.
    Completed,
    /// Rolled back. Terminal.
    Canceled,
}

impl OrderStatus {
    /// Whether no further transition is allowed from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// A purchased line item carrying name and price snapshots taken while the
/// product row lock was held, so later catalog edits never change history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Purchased product.
    pub product_id: ProductId,
    /// Product name at purchase time.
    pub name: String,
    /// Unit price at purchase time.
    pub unit_price: i64,
    /// Units purchased, positive.
    pub quantity: i64,
}

impl OrderItem {
    /// Price × quantity for this line.
    #[must_use]
    pub const fn line_total(&self) -> i64 {
        self.unit_price * self.quantity
    }
}

/// An order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Surrogate key.
    pub id: OrderId,
    /// Purchasing user.
    pub user_id: UserId,
    /// Line items with snapshots.
    pub items: Vec<OrderItem>,
    /// Sum of line totals.
    pub subtotal: i64,
    /// Discount subtracted by the coupon, zero without one.
    pub discount_amount: i64,
    /// Points debited from the user.
    pub used_points: i64,
    /// Amount charged to the gateway: `subtotal − discount − used_points`.
    pub total_amount: i64,
    /// Redeemed coupon code, if any.
    pub coupon_code: Option<String>,
    /// Current lifecycle state.
    pub status: OrderStatus,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Assemble a pending order from priced items, validating the money
    /// arithmetic.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::Validation`] for an empty item list and
    /// [`CommerceError::InvalidAmount`] when discount plus points exceed the
    /// subtotal.
    pub fn place(
        id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
        discount_amount: i64,
        used_points: i64,
        coupon_code: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CommerceError> {
        if items.is_empty() {
            return Err(CommerceError::Validation("order has no items".into()));
        }
        let subtotal: i64 = items.iter().map(OrderItem::line_total).sum();
        let total_amount = subtotal - discount_amount - used_points;
        if total_amount < 0 {
            return Err(CommerceError::InvalidAmount(total_amount));
        }
        Ok(Self {
            id,
            user_id,
            items,
            subtotal,
            discount_amount,
            used_points,
            total_amount,
            coupon_code,
            status: OrderStatus::Pending,
            created_at,
        })
    }

    /// Apply the `Pending → Completed` transition.
    ///
    /// Returns `false` when the order is already terminal (the transition is
    /// ignored for idempotency under event redelivery).
    pub fn complete(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Completed;
        true
    }

    /// Apply the `Pending → Canceled` transition.
    ///
    /// Returns `false` when the order is already terminal.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Canceled;
        true
    }
}
