//! PostgreSQL purchase store: the unit of work behind the purchasing saga.
//!
//! Row locks are taken with `SELECT … FOR UPDATE`; the lock-wait budget is
//! set per transaction so a contended row surfaces as
//! [`StoreError::LockTimeout`] instead of stalling the caller indefinitely.
//! The coupon holding is the one aggregate using optimistic versioning: its
//! save is an `UPDATE … WHERE version = $n` whose zero-row result becomes
//! [`StoreError::VersionConflict`].

use crate::rows::{
    assemble_order, discount_from_columns, map_db_err, order_status_str, payment_status_str,
    OrderItemRow, OrderRow, PaymentRow, ProductRow, UserRow,
};
use commerce_core::domain::{
    Coupon, Order, OrderStatus, Payment, PaymentStatus, Product, User, UserCoupon,
};
use commerce_core::error::{CommerceError, StoreError};
use commerce_core::ids::{CouponId, OrderId, PaymentId, ProductId, UserId};
use commerce_core::store::{NewOutboxEvent, PurchaseStore, PurchaseTx};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

/// PostgreSQL-backed commerce store.
///
/// One instance wraps a connection pool and hands out purchase transactions;
/// the same instance also serves the pool-level reader traits in
/// [`crate::readers`] and the outbox store in [`crate::outbox`].
#[derive(Clone)]
pub struct PgCommerceStore {
    pool: PgPool,
}

impl PgCommerceStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl PurchaseStore for PgCommerceStore {
    type Tx = PgPurchaseTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        // Bound lock waits so contention surfaces as a retryable conflict.
        sqlx::query("SET LOCAL lock_timeout = '5s'")
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        Ok(PgPurchaseTx { tx })
    }
}

/// One open PostgreSQL purchase transaction.
pub struct PgPurchaseTx {
    tx: Transaction<'static, Postgres>,
}

impl PgPurchaseTx {
    async fn nextval(&mut self, sequence: &str) -> Result<i64, StoreError> {
        // Sequence names are internal constants, never user input.
        let row = sqlx::query(&format!("SELECT nextval('{sequence}') AS id"))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        row.try_get("id").map_err(map_db_err)
    }

    async fn load_order_items(&mut self, id: OrderId) -> Result<Vec<OrderItemRow>, StoreError> {
        sqlx::query_as::<_, OrderItemRow>(
            "SELECT product_id, name, unit_price, quantity
             FROM order_items WHERE order_id = $1 ORDER BY line_no",
        )
        .bind(id.0)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_db_err)
    }
}

impl PurchaseTx for PgPurchaseTx {
    async fn next_order_id(&mut self) -> Result<OrderId, StoreError> {
        self.nextval("order_ids").await.map(OrderId)
    }

    async fn next_payment_id(&mut self) -> Result<PaymentId, StoreError> {
        self.nextval("payment_ids").await.map(PaymentId)
    }

    async fn user_for_update(&mut self, external_user_id: &str) -> Result<User, CommerceError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, external_user_id, email, point_balance
             FROM users WHERE external_user_id = $1 FOR UPDATE",
        )
        .bind(external_user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_db_err(e).into_conflict_aware())?;
        row.map(User::from).ok_or_else(|| CommerceError::NotFound {
            entity: "user",
            id: external_user_id.to_owned(),
        })
    }

    async fn product_for_update(&mut self, id: ProductId) -> Result<Product, CommerceError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, brand_id, name, price, stock, like_count
             FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_db_err(e).into_conflict_aware())?;
        row.map(Product::from)
            .ok_or_else(|| CommerceError::NotFound { entity: "product", id: id.to_string() })
    }

    async fn order_for_update(&mut self, id: OrderId) -> Result<Order, CommerceError> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT id, user_id, subtotal, discount_amount, used_points, total_amount,
                    coupon_code, status, created_at
             FROM orders WHERE id = $1 FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_db_err(e).into_conflict_aware())?
        .ok_or_else(|| CommerceError::NotFound { entity: "order", id: id.to_string() })?;
        let items = self.load_order_items(id).await?;
        Ok(assemble_order(row, items)?)
    }

    async fn coupon_for_redeem(
        &mut self,
        user_id: UserId,
        code: &str,
    ) -> Result<(Coupon, UserCoupon), CommerceError> {
        let coupon_row = sqlx::query(
            "SELECT id, code, discount_type, discount_value FROM coupons WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| CommerceError::NotFound { entity: "coupon", id: code.to_owned() })?;

        let coupon_id: i64 = coupon_row.try_get("id").map_err(map_db_err)?;
        let discount_type: String = coupon_row.try_get("discount_type").map_err(map_db_err)?;
        let discount_value: i64 = coupon_row.try_get("discount_value").map_err(map_db_err)?;
        let coupon = Coupon {
            id: CouponId(coupon_id),
            code: coupon_row.try_get("code").map_err(map_db_err)?,
            discount: discount_from_columns(&discount_type, discount_value)?,
        };

        let holding_row = sqlx::query(
            "SELECT is_used, version FROM user_coupons WHERE user_id = $1 AND coupon_id = $2",
        )
        .bind(user_id.0)
        .bind(coupon_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| CommerceError::NotFound {
            entity: "user coupon",
            id: format!("{user_id}/{code}"),
        })?;

        let holding = UserCoupon {
            user_id,
            coupon_id: coupon.id,
            is_used: holding_row.try_get("is_used").map_err(map_db_err)?,
            version: holding_row.try_get("version").map_err(map_db_err)?,
        };
        Ok((coupon, holding))
    }

    async fn save_user_coupon(&mut self, holding: &UserCoupon) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE user_coupons SET is_used = $3, version = version + 1
             WHERE user_id = $1 AND coupon_id = $2 AND version = $4",
        )
        .bind(holding.user_id.0)
        .bind(holding.coupon_id.0)
        .bind(holding.is_used)
        .bind(holding.version)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::VersionConflict(format!(
                "user coupon {}/{} version {}",
                holding.user_id, holding.coupon_id, holding.version
            )));
        }
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query("UPDATE products SET stock = $2 WHERE id = $1")
            .bind(product.id.0)
            .bind(product.stock)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn update_user_points(&mut self, user: &User) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET point_balance = $2 WHERE id = $1")
            .bind(user.id.0)
            .bind(user.point_balance)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders
                 (id, user_id, subtotal, discount_amount, used_points, total_amount,
                  coupon_code, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(order.id.0)
        .bind(order.user_id.0)
        .bind(order.subtotal)
        .bind(order.discount_amount)
        .bind(order.used_points)
        .bind(order.total_amount)
        .bind(order.coupon_code.as_deref())
        .bind(order_status_str(order.status))
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_err)?;

        for (line_no, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (order_id, line_no, product_id, name, unit_price, quantity)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(order.id.0)
            .bind(i32::try_from(line_no).unwrap_or(i32::MAX))
            .bind(item.product_id.0)
            .bind(&item.name)
            .bind(item.unit_price)
            .bind(item.quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        }
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payments (id, order_id, user_id, amount, card_type, transaction_key, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(payment.id.0)
        .bind(payment.order_id.0)
        .bind(payment.user_id.0)
        .bind(payment.amount)
        .bind(&payment.card_type)
        .bind(payment.transaction_key.as_deref())
        .bind(payment_status_str(payment.status))
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn set_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(id.0)
            .bind(order_status_str(status))
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn set_payment_result(
        &mut self,
        order_id: OrderId,
        status: PaymentStatus,
        transaction_key: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE payments
             SET status = $2, transaction_key = COALESCE($3, transaction_key)
             WHERE order_id = $1",
        )
        .bind(order_id.0)
        .bind(payment_status_str(status))
        .bind(transaction_key)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn next_event_version(
        &mut self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) + 1 AS next
             FROM outbox_events WHERE aggregate_type = $1 AND aggregate_id = $2",
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_err)?;
        row.try_get("next").map_err(map_db_err)
    }

    async fn append_outbox(&mut self, event: &NewOutboxEvent) -> Result<(), StoreError> {
        // A duplicate (aggregate, version) means this production already
        // happened; the conflict is swallowed and counts as success.
        sqlx::query(
            "INSERT INTO outbox_events
                 (event_id, event_type, aggregate_id, aggregate_type, version,
                  topic, partition_key, payload, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', $9)
             ON CONFLICT DO NOTHING",
        )
        .bind(event.event_id.0)
        .bind(&event.event_type)
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(event.version)
        .bind(&event.topic)
        .bind(&event.partition_key)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_db_err)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_db_err)
    }
}
