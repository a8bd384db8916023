//! Product catalog aggregates: product, brand, like.

use crate::error::CommerceError;
use crate::ids::{BrandId, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// A sellable product.
///
/// `stock` is mutated only under the product's row lock. `like_count` is a
/// denormalized cache of the likes table, rebuilt by the periodic batch; no
/// event handler writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Surrogate key.
    pub id: ProductId,
    /// Owning brand.
    pub brand_id: BrandId,
    /// Display name, snapshotted onto order items at purchase time.
    pub name: String,
    /// Unit price, positive.
    pub price: i64,
    /// Units on hand, never negative.
    pub stock: i64,
    /// Cached like total, eventually consistent.
    pub like_count: i64,
}

impl Product {
    /// Reserve stock for an order line.
    ///
    /// # Errors
    ///
    /// Returns [`CommerceError::InsufficientStock`] when fewer than `quantity`
    /// units remain, and [`CommerceError::Validation`] for a non-positive
    /// quantity.
    pub fn reserve_stock(&mut self, quantity: i64) -> Result<(), CommerceError> {
        if quantity <= 0 {
            return Err(CommerceError::Validation(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        if quantity > self.stock {
            return Err(CommerceError::InsufficientStock {
                product_id: self.id,
                requested: quantity,
                available: self.stock,
            });
        }
        self.stock -= quantity;
        Ok(())
    }

    /// Return previously reserved stock, used by compensation.
    pub fn release_stock(&mut self, quantity: i64) {
        self.stock += quantity;
    }
}

/// A brand. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brand {
    /// Surrogate key.
    pub id: BrandId,
    /// Display name.
    pub name: String,
}

/// A user's like of a product; `(user_id, product_id)` is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    /// The liking user.
    pub user_id: UserId,
    /// The liked product.
    pub product_id: ProductId,
}

/// Product detail joined with its brand name, the shape served by ranking
/// pages and persisted into ranking snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    /// Product id.
    pub id: ProductId,
    /// Product name.
    pub name: String,
    /// Unit price.
    pub price: i64,
    /// Brand id.
    pub brand_id: BrandId,
    /// Brand display name.
    pub brand_name: String,
    /// Cached like total at read time.
    pub like_count: i64,
}
