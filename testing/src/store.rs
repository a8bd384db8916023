//! In-memory commerce store with row-level locking semantics.
//!
//! Rows live in per-row async mutexes, so the concurrency behavior of the
//! real database carries over to tests: `FOR UPDATE` loads hold the row's
//! lock until commit, writers queue on contended rows, and the optimistic
//! coupon save blocks on the row lock before re-checking the version, exactly
//! the way a `WHERE version = $n` update behaves under read committed.
//!
//! Writes are buffered in the transaction and applied through the held guards
//! at commit; dropping the transaction without committing discards them.

use chrono::Utc;
use commerce_core::domain::{
    Brand, Coupon, Order, OrderStatus, Payment, PaymentStatus, Product, User, UserCoupon,
};
use commerce_core::error::{CommerceError, StoreError};
use commerce_core::ids::{BrandId, CouponId, OrderId, PaymentId, ProductId, UserId};
use commerce_core::store::{
    CatalogReader, NewOutboxEvent, OrderReader, OutboxEvent, OutboxStatus, OutboxStore,
    PurchaseStore, PurchaseTx,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Row<T> = Arc<Mutex<T>>;

#[derive(Default)]
struct Sequences {
    order: i64,
    payment: i64,
    outbox: i64,
}

#[derive(Default)]
struct Tables {
    users: Mutex<HashMap<UserId, Row<User>>>,
    users_by_external: Mutex<HashMap<String, UserId>>,
    products: Mutex<HashMap<ProductId, Row<Product>>>,
    brands: Mutex<HashMap<BrandId, Brand>>,
    coupons: Mutex<HashMap<String, Coupon>>,
    user_coupons: Mutex<HashMap<(UserId, CouponId), Row<UserCoupon>>>,
    orders: Mutex<HashMap<OrderId, Row<Order>>>,
    payments: Mutex<HashMap<OrderId, Row<Payment>>>,
    outbox: Mutex<Vec<OutboxEvent>>,
    sequences: Mutex<Sequences>,
}

/// In-memory implementation of the purchase store, order/catalog readers, and
/// the outbox store.
#[derive(Clone, Default)]
pub struct InMemoryCommerceStore {
    tables: Arc<Tables>,
}

impl InMemoryCommerceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user.
    pub async fn insert_user(&self, user: User) {
        self.tables
            .users_by_external
            .lock()
            .await
            .insert(user.external_user_id.clone(), user.id);
        self.tables
            .users
            .lock()
            .await
            .insert(user.id, Arc::new(Mutex::new(user)));
    }

    /// Seed a product.
    pub async fn insert_product(&self, product: Product) {
        self.tables
            .products
            .lock()
            .await
            .insert(product.id, Arc::new(Mutex::new(product)));
    }

    /// Seed a brand.
    pub async fn insert_brand(&self, brand: Brand) {
        self.tables.brands.lock().await.insert(brand.id, brand);
    }

    /// Seed a coupon definition.
    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.tables
            .coupons
            .lock()
            .await
            .insert(coupon.code.clone(), coupon);
    }

    /// Seed a user's coupon holding.
    pub async fn insert_user_coupon(&self, holding: UserCoupon) {
        self.tables
            .user_coupons
            .lock()
            .await
            .insert((holding.user_id, holding.coupon_id), Arc::new(Mutex::new(holding)));
    }

    /// Seed a committed outbox row, bypassing the saga. For relay tests.
    pub async fn seed_outbox_event(&self, event: NewOutboxEvent) {
        let id = {
            let mut seq = self.tables.sequences.lock().await;
            seq.outbox += 1;
            seq.outbox
        };
        self.tables.outbox.lock().await.push(OutboxEvent {
            id,
            event_id: event.event_id,
            event_type: event.event_type,
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type,
            version: event.version,
            topic: event.topic,
            partition_key: event.partition_key,
            payload: event.payload,
            status: OutboxStatus::Pending,
            created_at: event.created_at,
            published_at: None,
        });
    }

    /// Committed value of a user.
    pub async fn user(&self, id: UserId) -> Option<User> {
        let row = self.tables.users.lock().await.get(&id).cloned()?;
        Some(row.lock().await.clone())
    }

    /// Committed value of a product.
    pub async fn product(&self, id: ProductId) -> Option<Product> {
        let row = self.tables.products.lock().await.get(&id).cloned()?;
        Some(row.lock().await.clone())
    }

    /// Committed value of an order.
    pub async fn order(&self, id: OrderId) -> Option<Order> {
        let row = self.tables.orders.lock().await.get(&id).cloned()?;
        Some(row.lock().await.clone())
    }

    /// Committed value of a payment, by order.
    pub async fn payment(&self, order_id: OrderId) -> Option<Payment> {
        let row = self.tables.payments.lock().await.get(&order_id).cloned()?;
        Some(row.lock().await.clone())
    }

    /// Committed value of a coupon holding.
    pub async fn user_coupon(&self, user_id: UserId, coupon_id: CouponId) -> Option<UserCoupon> {
        let row = self
            .tables
            .user_coupons
            .lock()
            .await
            .get(&(user_id, coupon_id))
            .cloned()?;
        Some(row.lock().await.clone())
    }

    /// All committed outbox rows in insertion order.
    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.tables.outbox.lock().await.clone()
    }

    /// All committed orders.
    pub async fn orders(&self) -> Vec<Order> {
        let rows: Vec<Row<Order>> = self.tables.orders.lock().await.values().cloned().collect();
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(row.lock().await.clone());
        }
        orders
    }
}

impl PurchaseStore for InMemoryCommerceStore {
    type Tx = InMemoryPurchaseTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryPurchaseTx {
            tables: Arc::clone(&self.tables),
            user_guards: HashMap::new(),
            product_guards: HashMap::new(),
            order_guards: HashMap::new(),
            coupon_writes: Vec::new(),
            user_writes: HashMap::new(),
            product_writes: HashMap::new(),
            order_status_writes: HashMap::new(),
            payment_writes: Vec::new(),
            new_orders: Vec::new(),
            new_payments: Vec::new(),
            outbox_appends: Vec::new(),
        })
    }
}

/// One open in-memory purchase transaction.
pub struct InMemoryPurchaseTx {
    tables: Arc<Tables>,
    user_guards: HashMap<UserId, OwnedMutexGuard<User>>,
    product_guards: HashMap<ProductId, OwnedMutexGuard<Product>>,
    order_guards: HashMap<OrderId, OwnedMutexGuard<Order>>,
    coupon_writes: Vec<(OwnedMutexGuard<UserCoupon>, UserCoupon)>,
    user_writes: HashMap<UserId, User>,
    product_writes: HashMap<ProductId, Product>,
    order_status_writes: HashMap<OrderId, OrderStatus>,
    payment_writes: Vec<(OrderId, PaymentStatus, Option<String>)>,
    new_orders: Vec<Order>,
    new_payments: Vec<Payment>,
    outbox_appends: Vec<NewOutboxEvent>,
}

impl PurchaseTx for InMemoryPurchaseTx {
    async fn next_order_id(&mut self) -> Result<OrderId, StoreError> {
        let mut seq = self.tables.sequences.lock().await;
        seq.order += 1;
        Ok(OrderId(seq.order))
    }

    async fn next_payment_id(&mut self) -> Result<PaymentId, StoreError> {
        let mut seq = self.tables.sequences.lock().await;
        seq.payment += 1;
        Ok(PaymentId(seq.payment))
    }

    async fn user_for_update(&mut self, external_user_id: &str) -> Result<User, CommerceError> {
        let user_id = self
            .tables
            .users_by_external
            .lock()
            .await
            .get(external_user_id)
            .copied()
            .ok_or_else(|| CommerceError::NotFound {
                entity: "user",
                id: external_user_id.to_owned(),
            })?;
        if let Some(guard) = self.user_guards.get(&user_id) {
            return Ok(self.user_writes.get(&user_id).cloned().unwrap_or_else(|| (**guard).clone()));
        }
        let row = self
            .tables
            .users
            .lock()
            .await
            .get(&user_id)
            .cloned()
            .ok_or_else(|| CommerceError::NotFound {
                entity: "user",
                id: external_user_id.to_owned(),
            })?;
        let guard = row.lock_owned().await;
        let user = guard.clone();
        self.user_guards.insert(user_id, guard);
        Ok(user)
    }

    async fn product_for_update(&mut self, id: ProductId) -> Result<Product, CommerceError> {
        if let Some(guard) = self.product_guards.get(&id) {
            return Ok(self.product_writes.get(&id).cloned().unwrap_or_else(|| (**guard).clone()));
        }
        let row = self
            .tables
            .products
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CommerceError::NotFound { entity: "product", id: id.to_string() })?;
        let guard = row.lock_owned().await;
        let product = guard.clone();
        self.product_guards.insert(id, guard);
        Ok(product)
    }

    async fn order_for_update(&mut self, id: OrderId) -> Result<Order, CommerceError> {
        if let Some(guard) = self.order_guards.get(&id) {
            return Ok((**guard).clone());
        }
        let row = self
            .tables
            .orders
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CommerceError::NotFound { entity: "order", id: id.to_string() })?;
        let guard = row.lock_owned().await;
        let order = guard.clone();
        self.order_guards.insert(id, guard);
        Ok(order)
    }

    async fn coupon_for_redeem(
        &mut self,
        user_id: UserId,
        code: &str,
    ) -> Result<(Coupon, UserCoupon), CommerceError> {
        let coupon = self
            .tables
            .coupons
            .lock()
            .await
            .get(code)
            .cloned()
            .ok_or_else(|| CommerceError::NotFound { entity: "coupon", id: code.to_owned() })?;
        let row = self
            .tables
            .user_coupons
            .lock()
            .await
            .get(&(user_id, coupon.id))
            .cloned()
            .ok_or_else(|| CommerceError::NotFound {
                entity: "user coupon",
                id: format!("{user_id}/{code}"),
            })?;
        // Plain read without holding the row lock; the optimistic version
        // check at save time arbitrates concurrent redemptions.
        let holding = row.lock().await.clone();
        Ok((coupon, holding))
    }

    async fn save_user_coupon(&mut self, holding: &UserCoupon) -> Result<(), StoreError> {
        let row = self
            .tables
            .user_coupons
            .lock()
            .await
            .get(&(holding.user_id, holding.coupon_id))
            .cloned()
            .ok_or_else(|| StoreError::Database("user coupon row vanished".into()))?;
        // Blocks while a concurrent winner holds the row until its commit,
        // then re-checks the version it wrote.
        let guard = row.lock_owned().await;
        if guard.version != holding.version {
            return Err(StoreError::VersionConflict(format!(
                "user coupon {}/{} expected version {}, found {}",
                holding.user_id, holding.coupon_id, holding.version, guard.version
            )));
        }
        let mut updated = holding.clone();
        updated.version += 1;
        self.coupon_writes.push((guard, updated));
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        self.product_writes.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_user_points(&mut self, user: &User) -> Result<(), StoreError> {
        self.user_writes.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.new_orders.push(order.clone());
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.new_payments.push(payment.clone());
        Ok(())
    }

    async fn set_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        self.order_status_writes.insert(id, status);
        Ok(())
    }

    async fn set_payment_result(
        &mut self,
        order_id: OrderId,
        status: PaymentStatus,
        transaction_key: Option<&str>,
    ) -> Result<(), StoreError> {
        self.payment_writes
            .push((order_id, status, transaction_key.map(ToOwned::to_owned)));
        Ok(())
    }

    async fn next_event_version(
        &mut self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<i64, StoreError> {
        let committed = self
            .tables
            .outbox
            .lock()
            .await
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0);
        let staged = self
            .outbox_appends
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0);
        Ok(committed.max(staged) + 1)
    }

    async fn append_outbox(&mut self, event: &NewOutboxEvent) -> Result<(), StoreError> {
        self.outbox_appends.push(event.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        // Row updates go through the guards held since load.
        let user_writes: Vec<_> = self.user_writes.drain().collect();
        for (id, user) in user_writes {
            if let Some(guard) = self.user_guards.get_mut(&id) {
                **guard = user;
            } else {
                return Err(StoreError::Database(format!("user {id} updated without lock")));
            }
        }
        let product_writes: Vec<_> = self.product_writes.drain().collect();
        for (id, product) in product_writes {
            if let Some(guard) = self.product_guards.get_mut(&id) {
                **guard = product;
            } else {
                return Err(StoreError::Database(format!("product {id} updated without lock")));
            }
        }
        let order_writes: Vec<_> = self.order_status_writes.drain().collect();
        for (id, status) in order_writes {
            if let Some(guard) = self.order_guards.get_mut(&id) {
                guard.status = status;
            } else {
                return Err(StoreError::Database(format!("order {id} updated without lock")));
            }
        }
        for (mut guard, updated) in self.coupon_writes.drain(..) {
            *guard = updated;
        }

        for order in self.new_orders.drain(..) {
            self.tables
                .orders
                .lock()
                .await
                .insert(order.id, Arc::new(Mutex::new(order)));
        }
        for payment in self.new_payments.drain(..) {
            self.tables
                .payments
                .lock()
                .await
                .insert(payment.order_id, Arc::new(Mutex::new(payment)));
        }
        for (order_id, status, key) in self.payment_writes.drain(..) {
            let row = self
                .tables
                .payments
                .lock()
                .await
                .get(&order_id)
                .cloned()
                .ok_or_else(|| StoreError::Database(format!("payment for order {order_id} missing")))?;
            let mut payment = row.lock().await;
            payment.status = status;
            if let Some(key) = key {
                payment.transaction_key = Some(key);
            }
        }

        let appends: Vec<_> = self.outbox_appends.drain(..).collect();
        if !appends.is_empty() {
            let mut seq = self.tables.sequences.lock().await;
            let mut outbox = self.tables.outbox.lock().await;
            for event in appends {
                let duplicate = outbox.iter().any(|e| {
                    e.event_id == event.event_id
                        || (e.aggregate_id == event.aggregate_id
                            && e.aggregate_type == event.aggregate_type
                            && e.version == event.version)
                });
                if duplicate {
                    continue;
                }
                seq.outbox += 1;
                outbox.push(OutboxEvent {
                    id: seq.outbox,
                    event_id: event.event_id,
                    event_type: event.event_type,
                    aggregate_id: event.aggregate_id,
                    aggregate_type: event.aggregate_type,
                    version: event.version,
                    topic: event.topic,
                    partition_key: event.partition_key,
                    payload: event.payload,
                    status: OutboxStatus::Pending,
                    created_at: event.created_at,
                    published_at: None,
                });
            }
        }

        // Guards drop here, releasing every row lock.
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Buffered writes are discarded with self; guards release on drop.
        Ok(())
    }
}

impl OrderReader for InMemoryCommerceStore {
    async fn pending_orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<Row<Order>> = self.tables.orders.lock().await.values().cloned().collect();
        let mut pending = Vec::new();
        for row in rows {
            let order = row.lock().await.clone();
            if order.status == OrderStatus::Pending {
                pending.push(order);
            }
        }
        pending.sort_by_key(|o| o.id);
        Ok(pending)
    }

    async fn external_user_id(&self, user_id: UserId) -> Result<String, CommerceError> {
        let row = self
            .tables
            .users
            .lock()
            .await
            .get(&user_id)
            .cloned()
            .ok_or_else(|| CommerceError::NotFound { entity: "user", id: user_id.to_string() })?;
        Ok(row.lock().await.external_user_id.clone())
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.order(id).await)
    }

    async fn find_payment(&self, order_id: OrderId) -> Result<Option<Payment>, StoreError> {
        Ok(self.payment(order_id).await)
    }
}

impl CatalogReader for InMemoryCommerceStore {
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, StoreError> {
        let mut found = Vec::new();
        for id in ids {
            if let Some(product) = self.product(*id).await {
                found.push(product);
            }
        }
        Ok(found)
    }

    async fn brands_by_ids(&self, ids: &[BrandId]) -> Result<Vec<Brand>, StoreError> {
        let brands = self.tables.brands.lock().await;
        Ok(ids.iter().filter_map(|id| brands.get(id).cloned()).collect())
    }

    async fn products_by_like_count(&self, offset: u64, limit: u64) -> Result<Vec<Product>, StoreError> {
        let rows: Vec<Row<Product>> = self.tables.products.lock().await.values().cloned().collect();
        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            products.push(row.lock().await.clone());
        }
        products.sort_by(|a, b| b.like_count.cmp(&a.like_count).then(a.id.cmp(&b.id)));
        Ok(products
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn product_count(&self) -> Result<u64, StoreError> {
        Ok(self.tables.products.lock().await.len() as u64)
    }
}

impl OutboxStore for InMemoryCommerceStore {
    async fn poll_pending(&self, limit: u32, _claim: bool) -> Result<Vec<OutboxEvent>, StoreError> {
        let outbox = self.tables.outbox.lock().await;
        let mut pending: Vec<OutboxEvent> = outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn mark_published(
        &self,
        id: i64,
        published_at: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut outbox = self.tables.outbox.lock().await;
        let row = outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::Database(format!("outbox row {id} missing")))?;
        row.status = OutboxStatus::Published;
        row.published_at = Some(published_at);
        Ok(())
    }

    async fn mark_failed(&self, id: i64) -> Result<(), StoreError> {
        let mut outbox = self.tables.outbox.lock().await;
        let row = outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::Database(format!("outbox row {id} missing")))?;
        row.status = OutboxStatus::Failed;
        Ok(())
    }
}
