//! Thin store traits at the seams of the system.
//!
//! Each aggregate gets a narrow interface exposing only the operations the
//! core needs: load-for-update, save, and a handful of filtered finders. No
//! ORM shapes are reproduced here.
//!
//! # Trait styles
//!
//! Three styles, each where it is needed:
//!
//! - The saga-side traits ([`PurchaseStore`], [`PurchaseTx`], [`OrderReader`])
//!   declare `impl Future … + Send` returns, because event handlers box their
//!   futures for the worker pool while staying generic over the store.
//! - Read-side traits consumed only through generics use plain `async fn`;
//!   auto traits resolve at the call site.
//! - The payment gateway is held as a trait object across a heterogeneous
//!   registry and uses explicit `Pin<Box<dyn Future>>` returns for dyn
//!   compatibility.
//!
//! # Implementations
//!
//! - `commerce-postgres`: production stores over sqlx
//! - `commerce-redis`: sorted set and KV cache over redis-rs
//! - `commerce-redpanda`: streaming bus over rdkafka
//! - `commerce-testing`: deterministic in-memory fakes

#![allow(async_fn_in_trait)]

use crate::domain::{Brand, Coupon, Order, OrderStatus, Payment, PaymentStatus, Product, User, UserCoupon};
use crate::error::{BusError, CommerceError, StoreError};
use crate::event::EventEnvelope;
use crate::ids::{BrandId, EventId, OrderId, PaymentId, ProductId, UserId};
use crate::view::RankingSnapshot;
use chrono::{DateTime, NaiveDate, Utc};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Purchase unit of work
// ---------------------------------------------------------------------------

/// Factory for purchase transactions.
///
/// A purchase transaction spans the whole saga body: row-locked loads, stock
/// and point mutations, order/payment inserts, and the outbox append, all
/// committed or rolled back together.
pub trait PurchaseStore: Send + Sync + 'static {
    /// The transaction handle type.
    type Tx: PurchaseTx;

    /// Open a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when a connection cannot be acquired.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;
}

/// One open purchase transaction.
///
/// Dropping the handle without calling [`PurchaseTx::commit`] must roll the
/// transaction back. Lock-acquiring loads block until the row lock is granted
/// or the lock-wait budget expires as [`StoreError::LockTimeout`].
pub trait PurchaseTx: Send {
    /// Allocate the next order id.
    fn next_order_id(&mut self) -> impl Future<Output = Result<OrderId, StoreError>> + Send;

    /// Allocate the next payment id.
    fn next_payment_id(&mut self) -> impl Future<Output = Result<PaymentId, StoreError>> + Send;

    /// Load a user by external id, taking its row lock.
    fn user_for_update(
        &mut self,
        external_user_id: &str,
    ) -> impl Future<Output = Result<User, CommerceError>> + Send;

    /// Load a product, taking its row lock. Callers must acquire product
    /// locks in ascending id order.
    fn product_for_update(
        &mut self,
        id: ProductId,
    ) -> impl Future<Output = Result<Product, CommerceError>> + Send;

    /// Load an order, taking its row lock.
    fn order_for_update(
        &mut self,
        id: OrderId,
    ) -> impl Future<Output = Result<Order, CommerceError>> + Send;

    /// Load a coupon and the user's holding of it for redemption. No row lock
    /// is taken; the holding uses optimistic versioning instead.
    fn coupon_for_redeem(
        &mut self,
        user_id: UserId,
        code: &str,
    ) -> impl Future<Output = Result<(Coupon, UserCoupon), CommerceError>> + Send;

    /// Persist a redeemed holding, checking its optimistic version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionConflict`] when another transaction
    /// bumped the version since the holding was loaded.
    fn save_user_coupon(
        &mut self,
        holding: &UserCoupon,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Write back a product's mutated stock.
    fn update_product(
        &mut self,
        product: &Product,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Write back a user's mutated point balance.
    fn update_user_points(&mut self, user: &User) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert a new order.
    fn insert_order(&mut self, order: &Order) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert a new payment.
    fn insert_payment(
        &mut self,
        payment: &Payment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Set an order's status.
    fn set_order_status(
        &mut self,
        id: OrderId,
        status: OrderStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Record a payment outcome (and transaction key, when known) by order.
    fn set_payment_result(
        &mut self,
        order_id: OrderId,
        status: PaymentStatus,
        transaction_key: Option<&str>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Allocate the next outbox version for an aggregate:
    /// `max(existing) + 1`, starting at 1.
    fn next_event_version(
        &mut self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Append an event to the outbox.
    ///
    /// A `(aggregate_id, aggregate_type, version)` unique-key conflict means
    /// the same production already happened (saga retry after partial
    /// failure); implementations swallow it and return `Ok`.
    fn append_outbox(
        &mut self,
        event: &NewOutboxEvent,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Commit the transaction.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Roll the transaction back explicitly.
    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// Read-side stores
// ---------------------------------------------------------------------------

/// Pool-level order reads used by the recovery loop and tests.
pub trait OrderReader: Send + Sync {
    /// All orders currently in `Pending` status.
    fn pending_orders(&self) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send;

    /// Resolve a user's external id.
    fn external_user_id(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<String, CommerceError>> + Send;

    /// Load an order without locking.
    fn find_order(&self, id: OrderId) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Load an order's payment without locking.
    fn find_payment(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Payment>, StoreError>> + Send;
}

/// Catalog reads used for ranking hydration and the degraded default view.
pub trait CatalogReader: Send + Sync {
    /// Batch-load products by id. Missing ids are simply absent from the
    /// result.
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, StoreError>;

    /// Batch-load brands by id.
    async fn brands_by_ids(&self, ids: &[BrandId]) -> Result<Vec<Brand>, StoreError>;

    /// Page products ordered by `like_count` descending, id ascending as the
    /// tie-breaker.
    async fn products_by_like_count(&self, offset: u64, limit: u64) -> Result<Vec<Product>, StoreError>;

    /// Total number of products.
    async fn product_count(&self) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Publication status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Awaiting the relay.
    Pending,
    /// Acknowledged by the bus. Terminal.
    Published,
    /// Rejected by the bus; an operator must reset it to `Pending`.
    Failed,
}

/// Insert shape for an outbox row, produced inside the domain transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    /// Unique event identity.
    pub event_id: EventId,
    /// Wire name of the event.
    pub event_type: String,
    /// Aggregate identity.
    pub aggregate_id: String,
    /// Aggregate type.
    pub aggregate_type: String,
    /// Per-aggregate monotonic version.
    pub version: i64,
    /// Destination topic.
    pub topic: String,
    /// Partition key at the bus.
    pub partition_key: String,
    /// Full wire message (envelope with payload) as JSON.
    pub payload: serde_json::Value,
    /// Creation instant, drives relay ordering.
    pub created_at: DateTime<Utc>,
}

/// A persisted outbox row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    /// Surrogate key.
    pub id: i64,
    /// Unique event identity.
    pub event_id: EventId,
    /// Wire name of the event.
    pub event_type: String,
    /// Aggregate identity.
    pub aggregate_id: String,
    /// Aggregate type.
    pub aggregate_type: String,
    /// Per-aggregate monotonic version.
    pub version: i64,
    /// Destination topic.
    pub topic: String,
    /// Partition key at the bus.
    pub partition_key: String,
    /// Full wire message (envelope with payload) as JSON.
    pub payload: serde_json::Value,
    /// Publication status.
    pub status: OutboxStatus,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// When the bus acknowledged the row.
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Decode the stored wire message back into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored payload is not a valid envelope.
    pub fn envelope(&self) -> Result<EventEnvelope, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Pool-level outbox access used by the relay.
pub trait OutboxStore: Send + Sync {
    /// Fetch up to `limit` `Pending` rows ordered by `created_at` ascending.
    ///
    /// With `claim` set, rows are claimed with `FOR UPDATE SKIP LOCKED`
    /// semantics so concurrent relay replicas never pick the same batch.
    async fn poll_pending(&self, limit: u32, claim: bool) -> Result<Vec<OutboxEvent>, StoreError>;

    /// Mark a row published.
    async fn mark_published(&self, id: i64, published_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Mark a row failed. Failed rows are not retried automatically.
    async fn mark_failed(&self, id: i64) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Consumer-side idempotency
// ---------------------------------------------------------------------------

/// Ledger of processed event ids.
///
/// Insert-uniqueness is the coordination primitive: the first `record` for an
/// id returns `true`, every later one returns `false`.
pub trait IdempotencyLedger: Send + Sync {
    /// Record an event id. Returns `false` when it was already present.
    async fn record(&self, event_id: EventId) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Ranking infrastructure
// ---------------------------------------------------------------------------

/// Sorted-set operations backing the ranking view.
///
/// Scores are IEEE-754 doubles; members are opaque strings (decimal product
/// ids in this system). Individual operations are atomic; nothing here locks
/// across members.
pub trait SortedSetStore: Send + Sync {
    /// Add `delta` to a member's score, creating it at `delta` when absent.
    /// Returns the new score.
    async fn incr_score(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError>;

    /// Members with scores, ordered by score descending, over the inclusive
    /// index range `start..=stop`. Negative indices count from the end, so
    /// `(0, -1)` is the whole set.
    async fn range_desc(&self, key: &str, start: i64, stop: i64) -> Result<Vec<(String, f64)>, StoreError>;

    /// Zero-based descending rank of a member, `None` when absent.
    async fn rank_desc(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError>;

    /// Number of members.
    async fn card(&self, key: &str) -> Result<u64, StoreError>;

    /// Set a TTL only when the key has none yet (`EXPIRE … NX`). Returns
    /// whether the TTL was set by this call.
    async fn expire_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Store the weighted union of `sources` into `dest`, replacing it.
    /// Returns the resulting cardinality.
    async fn union_weighted(&self, dest: &str, sources: &[(String, f64)]) -> Result<u64, StoreError>;
}

/// Key → JSON cache with TTL, used for catalog hot reads.
pub trait KVCache: Send + Sync {
    /// Read a cached value.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Write a value with a TTL.
    async fn put(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<(), StoreError>;

    /// Drop a cached value.
    async fn evict(&self, key: &str) -> Result<(), StoreError>;
}

/// Persisted ranking snapshots for disaster fallback.
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot; a newer write for the same date supersedes.
    async fn save(&self, snapshot: &RankingSnapshot) -> Result<(), StoreError>;

    /// Load the snapshot for a date.
    async fn get(&self, date: NaiveDate) -> Result<Option<RankingSnapshot>, StoreError>;
}

// ---------------------------------------------------------------------------
// Streaming bus
// ---------------------------------------------------------------------------

/// One record received from the streaming bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the record came from.
    pub topic: String,
    /// Partition key it was published with.
    pub key: String,
    /// Raw value bytes (a JSON [`EventEnvelope`] in this system).
    pub payload: Vec<u8>,
}

/// Stream of records from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BusMessage, BusError>> + Send>>;

/// An external ordered append log, partitioned by key.
///
/// Delivery to subscribers is at-least-once; per-key order is preserved
/// within a partition, nothing is guaranteed across keys.
pub trait StreamingBus: Send + Sync {
    /// Publish a record. Resolves once the bus acknowledges it.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Subscribe to topics as a member of `group`.
    async fn subscribe(&self, topics: &[&str], group: &str) -> Result<MessageStream, BusError>;
}

// ---------------------------------------------------------------------------
// Payment gateway
// ---------------------------------------------------------------------------

/// Terminal or in-flight status reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    /// The gateway is still processing.
    Pending,
    /// The payment went through.
    Success,
    /// The payment was declined.
    Failed,
}

/// A transaction as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTransaction {
    /// Gateway-side transaction handle.
    pub transaction_key: String,
    /// Reported status.
    pub status: GatewayStatus,
    /// Decline reason, when the gateway gave one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// Request body for initiating a payment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// The order being paid.
    pub order_id: OrderId,
    /// Card network or issuer label.
    pub card_type: String,
    /// Card number.
    pub card_no: String,
    /// Amount to charge.
    pub amount: i64,
    /// Callback URL the gateway may notify.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub callback_url: Option<String>,
}

/// Outcome of a gateway call after the resilience stack has run.
///
/// `Unavailable` is the fallback marker: the circuit was open, the call timed
/// out, or retries were exhausted. Payment state is unknown and the caller
/// must not cancel anything on its basis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReply<T> {
    /// The gateway answered.
    Answered(T),
    /// The gateway could not be reached; state unknown.
    Unavailable,
}

impl<T> GatewayReply<T> {
    /// The answered value, if any.
    pub fn answered(self) -> Option<T> {
        match self {
            Self::Answered(value) => Some(value),
            Self::Unavailable => None,
        }
    }
}

/// Client for the external payment gateway.
///
/// `request_payment` is the user-facing path and never retries; the two query
/// methods are scheduler-driven and retry transient failures with backoff.
/// All methods surface circuit-open and exhausted-retry conditions as
/// [`GatewayReply::Unavailable`] rather than as errors; `Err` is reserved for
/// permanent rejections ([`CommerceError::GatewayRejected`]).
pub trait PaymentGateway: Send + Sync {
    /// Initiate a payment for an order.
    fn request_payment(
        &self,
        user_external_id: &str,
        request: &PaymentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayReply<GatewayTransaction>, CommerceError>> + Send + '_>>;

    /// List the gateway's transactions for an order.
    fn transactions_by_order(
        &self,
        user_external_id: &str,
        order_id: OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayReply<Vec<GatewayTransaction>>, CommerceError>> + Send + '_>>;

    /// Fetch one transaction by key.
    fn transaction(
        &self,
        user_external_id: &str,
        transaction_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayReply<GatewayTransaction>, CommerceError>> + Send + '_>>;
}
