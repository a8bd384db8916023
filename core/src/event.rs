//! Domain events, their JSON payload contracts, and the bus envelope.
//!
//! # Topics
//!
//! Topics follow the `{aggregate}-events` convention and are partitioned by a
//! per-event key so that all events of one aggregate land on one partition:
//!
//! - [`topics::ORDER_EVENTS`]: `OrderCreated`, `OrderCanceled`; key = order id
//! - [`topics::LIKE_EVENTS`]: `LikeAdded`, `LikeRemoved`; key = product id
//! - [`topics::PRODUCT_EVENTS`]: `ProductViewed`; key = product id
//!
//! # Envelope
//!
//! Every bus message is an [`EventEnvelope`]: `{eventId, eventType,
//! aggregateId, aggregateType, version, occurredAt, payload}`. The event id is
//! the consumer-side dedup key; `(aggregateId, aggregateType, version)` is the
//! producer-side dedup key at the outbox.
//!
//! # Phasing
//!
//! Payment outcome events (`PaymentCompleted`, `PaymentFailed`) drive order
//! state transitions inside this process and are not routed to the outbox:
//! [`DomainEvent::route`] returns `None` for them.

use crate::ids::{EventId, OrderId, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known topic names.
pub mod topics {
    /// Order lifecycle events, partitioned by order id.
    pub const ORDER_EVENTS: &str = "order-events";
    /// Like/unlike events, partitioned by product id.
    pub const LIKE_EVENTS: &str = "like-events";
    /// Product view events, partitioned by product id.
    pub const PRODUCT_EVENTS: &str = "product-events";
}

/// One line of an [`OrderCreated`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    /// Purchased product.
    pub product_id: ProductId,
    /// Units purchased.
    pub quantity: i64,
}

/// Payload of the `OrderCreated` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    /// The created order.
    pub order_id: OrderId,
    /// The purchasing user.
    pub user_id: UserId,
    /// Redeemed coupon code, absent when none was used.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub coupon_code: Option<String>,
    /// Sum of line totals before discounts.
    pub subtotal: i64,
    /// Points debited from the user.
    pub used_point_amount: i64,
    /// Purchased lines.
    pub items: Vec<OrderLine>,
    /// When the order was created.
    pub occurred_at: DateTime<Utc>,
}

/// Payload of the `OrderCanceled` event emitted by compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCanceled {
    /// The canceled order.
    pub order_id: OrderId,
    /// The ordering user.
    pub user_id: UserId,
    /// Points credited back by the compensation.
    pub refunded_points: i64,
    /// When the cancellation happened.
    pub occurred_at: DateTime<Utc>,
}

/// Payload shared by `LikeAdded` and `LikeRemoved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeChanged {
    /// The (un)liking user.
    pub user_id: UserId,
    /// The affected product.
    pub product_id: ProductId,
    /// When the change happened.
    pub occurred_at: DateTime<Utc>,
}

/// Payload of the `ProductViewed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductViewed {
    /// The viewed product.
    pub product_id: ProductId,
    /// The viewing user.
    pub user_id: UserId,
    /// When the view happened.
    pub occurred_at: DateTime<Utc>,
}

/// Payload of the in-process `PaymentRequested` event.
///
/// Carries the card details from the purchase command to the after-commit
/// payment kickoff; never routed to the outbox and never logged wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequested {
    /// The order to pay.
    pub order_id: OrderId,
    /// The paying user.
    pub user_id: UserId,
    /// External id sent to the gateway in `X-USER-ID`.
    pub user_external_id: String,
    /// Amount to charge.
    pub amount: i64,
    /// Card network or issuer label.
    pub card_type: String,
    /// Card number.
    pub card_no: String,
    /// When the order committed.
    pub occurred_at: DateTime<Utc>,
}

/// Payload of the in-process `PaymentCompleted` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    /// The paid order.
    pub order_id: OrderId,
    /// Gateway transaction handle, when one was reported.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transaction_key: Option<String>,
    /// When the confirmation was observed.
    pub occurred_at: DateTime<Utc>,
}

/// Payload of the in-process `PaymentFailed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    /// The order whose payment failed.
    pub order_id: OrderId,
    /// Points to credit back during compensation.
    pub refund_points: i64,
    /// Gateway-provided reason, when present.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    /// When the failure was observed.
    pub occurred_at: DateTime<Utc>,
}

/// All events emitted by the domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An order was created by the purchasing saga.
    OrderCreated(OrderCreated),
    /// An order was canceled by compensation.
    OrderCanceled(OrderCanceled),
    /// A user liked a product.
    LikeAdded(LikeChanged),
    /// A user removed a like.
    LikeRemoved(LikeChanged),
    /// A user viewed a product.
    ProductViewed(ProductViewed),
    /// An order committed and its payment should be requested. In-process
    /// only.
    PaymentRequested(PaymentRequested),
    /// The gateway confirmed a payment. In-process only.
    PaymentCompleted(PaymentCompleted),
    /// The gateway rejected a payment. In-process only.
    PaymentFailed(PaymentFailed),
}

/// Outbox routing for an event: which topic and partition it belongs to and
/// which aggregate stream numbers its versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRoute {
    /// Destination topic.
    pub topic: &'static str,
    /// Partition key at the bus.
    pub partition_key: String,
    /// Aggregate identity for version allocation.
    pub aggregate_id: String,
    /// Aggregate type for version allocation.
    pub aggregate_type: &'static str,
}

impl DomainEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated(_) => "OrderCreated",
            Self::OrderCanceled(_) => "OrderCanceled",
            Self::LikeAdded(_) => "LikeAdded",
            Self::LikeRemoved(_) => "LikeRemoved",
            Self::ProductViewed(_) => "ProductViewed",
            Self::PaymentRequested(_) => "PaymentRequested",
            Self::PaymentCompleted(_) => "PaymentCompleted",
            Self::PaymentFailed(_) => "PaymentFailed",
        }
    }

    /// When the event occurred.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::OrderCreated(e) => e.occurred_at,
            Self::OrderCanceled(e) => e.occurred_at,
            Self::LikeAdded(e) | Self::LikeRemoved(e) => e.occurred_at,
            Self::ProductViewed(e) => e.occurred_at,
            Self::PaymentRequested(e) => e.occurred_at,
            Self::PaymentCompleted(e) => e.occurred_at,
            Self::PaymentFailed(e) => e.occurred_at,
        }
    }

    /// Outbox routing, or `None` for events that stay inside the process.
    #[must_use]
    pub fn route(&self) -> Option<OutboxRoute> {
        match self {
            Self::OrderCreated(e) => Some(OutboxRoute {
                topic: topics::ORDER_EVENTS,
                partition_key: e.order_id.to_string(),
                aggregate_id: e.order_id.to_string(),
                aggregate_type: "Order",
            }),
            Self::OrderCanceled(e) => Some(OutboxRoute {
                topic: topics::ORDER_EVENTS,
                partition_key: e.order_id.to_string(),
                aggregate_id: e.order_id.to_string(),
                aggregate_type: "Order",
            }),
            Self::LikeAdded(e) | Self::LikeRemoved(e) => Some(OutboxRoute {
                topic: topics::LIKE_EVENTS,
                partition_key: e.product_id.to_string(),
                aggregate_id: e.product_id.to_string(),
                aggregate_type: "Product",
            }),
            Self::ProductViewed(e) => Some(OutboxRoute {
                topic: topics::PRODUCT_EVENTS,
                partition_key: e.product_id.to_string(),
                aggregate_id: e.product_id.to_string(),
                aggregate_type: "Product",
            }),
            Self::PaymentRequested(_) | Self::PaymentCompleted(_) | Self::PaymentFailed(_) => None,
        }
    }

    /// Serialize the event's payload (without envelope fields) to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error when serde fails, which for these types means an
    /// out-of-range number and is not expected in practice.
    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::OrderCreated(e) => serde_json::to_value(e),
            Self::OrderCanceled(e) => serde_json::to_value(e),
            Self::LikeAdded(e) | Self::LikeRemoved(e) => serde_json::to_value(e),
            Self::ProductViewed(e) => serde_json::to_value(e),
            Self::PaymentRequested(e) => serde_json::to_value(e),
            Self::PaymentCompleted(e) => serde_json::to_value(e),
            Self::PaymentFailed(e) => serde_json::to_value(e),
        }
    }
}

/// The wire envelope carried by every bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique event identity, the consumer-side dedup key.
    pub event_id: EventId,
    /// Wire name of the event, e.g. `"OrderCreated"`.
    pub event_type: String,
    /// Aggregate identity this event belongs to.
    pub aggregate_id: String,
    /// Aggregate type, e.g. `"Order"`.
    pub aggregate_type: String,
    /// Per-aggregate monotonic version.
    pub version: i64,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Event-specific payload.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Encode the envelope as JSON bytes for the bus.
    ///
    /// # Errors
    ///
    /// Returns an error when serde fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode an envelope from JSON bytes received off the bus.
    ///
    /// # Errors
    ///
    /// Returns an error when the bytes are not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Deserialize the payload into a concrete event payload type.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload does not match `T`'s contract.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn order_created() -> DomainEvent {
        DomainEvent::OrderCreated(OrderCreated {
            order_id: OrderId(42),
            user_id: UserId(7),
            coupon_code: None,
            subtotal: 4_000,
            used_point_amount: 1_000,
            items: vec![OrderLine { product_id: ProductId(1), quantity: 2 }],
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn order_created_routes_to_order_events() {
        let route = order_created().route().unwrap();
        assert_eq!(route.topic, topics::ORDER_EVENTS);
        assert_eq!(route.partition_key, "42");
        assert_eq!(route.aggregate_type, "Order");
    }

    #[test]
    fn payment_events_stay_in_process() {
        let event = DomainEvent::PaymentCompleted(PaymentCompleted {
            order_id: OrderId(1),
            transaction_key: Some("tx-1".into()),
            occurred_at: Utc::now(),
        });
        assert!(event.route().is_none());
    }

    #[test]
    fn payload_uses_camel_case_contract() {
        let payload = order_created().payload_json().unwrap();
        assert_eq!(payload["orderId"], 42);
        assert_eq!(payload["usedPointAmount"], 1_000);
        assert_eq!(payload["items"][0]["productId"], 1);
        // absent coupon is omitted, not null
        assert!(payload.get("couponCode").is_none());
    }

    #[test]
    fn envelope_round_trips_through_bytes() {
        let event = order_created();
        let envelope = EventEnvelope {
            event_id: EventId::new(),
            event_type: event.event_type().to_owned(),
            aggregate_id: "42".into(),
            aggregate_type: "Order".into(),
            version: 1,
            occurred_at: event.occurred_at(),
            payload: event.payload_json().unwrap(),
        };
        let bytes = envelope.encode().unwrap();
        let decoded = EventEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
        let payload: OrderCreated = decoded.payload_as().unwrap();
        assert_eq!(payload.order_id, OrderId(42));
    }
}
