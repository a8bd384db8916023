//! Pool-level read implementations: pending orders for the recovery loop and
//! catalog reads for ranking hydration.

use crate::rows::{assemble_order, map_db_err, BrandRow, OrderItemRow, OrderRow, PaymentRow, ProductRow};
use crate::store::PgCommerceStore;
use commerce_core::domain::{Brand, Order, Payment, Product};
use commerce_core::error::{CommerceError, StoreError};
use commerce_core::ids::{BrandId, OrderId, ProductId, UserId};
use commerce_core::store::{CatalogReader, OrderReader};
use sqlx::Row;
use std::collections::HashMap;

impl PgCommerceStore {
    async fn items_for_orders(
        &self,
        order_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<OrderItemRow>>, StoreError> {
        let rows = sqlx::query(
            "SELECT order_id, product_id, name, unit_price, quantity
             FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, line_no",
        )
        .bind(order_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_db_err)?;

        let mut grouped: HashMap<i64, Vec<OrderItemRow>> = HashMap::new();
        for row in rows {
            let order_id: i64 = row.try_get("order_id").map_err(map_db_err)?;
            grouped.entry(order_id).or_default().push(OrderItemRow {
                product_id: row.try_get("product_id").map_err(map_db_err)?,
                name: row.try_get("name").map_err(map_db_err)?,
                unit_price: row.try_get("unit_price").map_err(map_db_err)?,
                quantity: row.try_get("quantity").map_err(map_db_err)?,
            });
        }
        Ok(grouped)
    }
}

impl OrderReader for PgCommerceStore {
    async fn pending_orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT id, user_id, subtotal, discount_amount, used_points, total_amount,
                    coupon_code, status, created_at
             FROM orders WHERE status = 'PENDING' ORDER BY id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_db_err)?;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut items = self.items_for_orders(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                assemble_order(row, order_items)
            })
            .collect()
    }

    async fn external_user_id(&self, user_id: UserId) -> Result<String, CommerceError> {
        let row = sqlx::query("SELECT external_user_id FROM users WHERE id = $1")
            .bind(user_id.0)
            .fetch_optional(self.pool())
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| CommerceError::NotFound { entity: "user", id: user_id.to_string() })?;
        row.try_get("external_user_id")
            .map_err(|e| map_db_err(e).into())
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let Some(row) = sqlx::query_as::<_, OrderRow>(
            "SELECT id, user_id, subtotal, discount_amount, used_points, total_amount,
                    coupon_code, status, created_at
             FROM orders WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await
        .map_err(map_db_err)?
        else {
            return Ok(None);
        };
        let mut items = self.items_for_orders(&[id.0]).await?;
        Ok(Some(assemble_order(row, items.remove(&id.0).unwrap_or_default())?))
    }

    async fn find_payment(&self, order_id: OrderId) -> Result<Option<Payment>, StoreError> {
        sqlx::query_as::<_, PaymentRow>(
            "SELECT id, order_id, user_id, amount, card_type, transaction_key, status
             FROM payments WHERE order_id = $1",
        )
        .bind(order_id.0)
        .fetch_optional(self.pool())
        .await
        .map_err(map_db_err)?
        .map(Payment::try_from)
        .transpose()
    }
}

impl CatalogReader for PgCommerceStore {
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, StoreError> {
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, brand_id, name, price, stock, like_count
             FROM products WHERE id = ANY($1)",
        )
        .bind(&raw)
        .fetch_all(self.pool())
        .await
        .map_err(map_db_err)?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn brands_by_ids(&self, ids: &[BrandId]) -> Result<Vec<Brand>, StoreError> {
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query_as::<_, BrandRow>("SELECT id, name FROM brands WHERE id = ANY($1)")
            .bind(&raw)
            .fetch_all(self.pool())
            .await
            .map_err(map_db_err)?;
        Ok(rows.into_iter().map(Brand::from).collect())
    }

    async fn products_by_like_count(&self, offset: u64, limit: u64) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, brand_id, name, price, stock, like_count
             FROM products ORDER BY like_count DESC, id ASC OFFSET $1 LIMIT $2",
        )
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await
        .map_err(map_db_err)?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn product_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM products")
            .fetch_one(self.pool())
            .await
            .map_err(map_db_err)?;
        let count: i64 = row.try_get("count").map_err(map_db_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
