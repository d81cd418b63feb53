use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use watchstore_core::{DomainError, DomainResult, Entity, ProductId};

/// Stock level under which `check_stock` reports a product as low.
pub const DEFAULT_LOW_STOCK_THRESHOLD: u32 = 10;

/// Catalogue product.
///
/// Serialized form is the full snapshot carried by `product.updated` and
/// `product.low-stock` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Price in smallest currency unit (e.g., cents).
    pub price: u64,
    /// Units in stock. Never negative.
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Requested stock exceeds what is available. Nothing was changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("insufficient stock: requested {requested}, available {available}")]
pub struct InsufficientStock {
    pub available: u32,
    pub requested: u32,
}

impl Product {
    /// Remove `quantity` units from stock.
    ///
    /// Rejected, not clamped, when it would take stock below zero.
    pub fn decrement(
        &mut self,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<(), InsufficientStock> {
        let remaining = self
            .quantity
            .checked_sub(quantity)
            .ok_or(InsufficientStock {
                available: self.quantity,
                requested: quantity,
            })?;
        self.quantity = remaining;
        self.updated_at = now;
        Ok(())
    }

    /// Whether stock is below `threshold`.
    pub fn is_low_stock(&self, threshold: u32) -> bool {
        self.quantity < threshold
    }

    /// Apply a partial update, validating every provided field first.
    pub fn apply_patch(&mut self, patch: ProductPatch, now: DateTime<Utc>) -> DomainResult<()> {
        let price = patch.price.map(non_negative_price).transpose()?;
        let quantity = patch.quantity.map(non_negative_quantity).transpose()?;
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }

        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(price) = price {
            self.price = price;
        }
        if let Some(quantity) = quantity {
            self.quantity = quantity;
        }
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for creating a product. Signed so that negative values can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub quantity: i64,
}

impl NewProduct {
    pub fn into_product(self, id: ProductId, now: DateTime<Utc>) -> DomainResult<Product> {
        validate_name(&self.name)?;
        Ok(Product {
            id,
            name: self.name,
            description: self.description,
            price: non_negative_price(self.price)?,
            quantity: non_negative_quantity(self.quantity)?,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of a product; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub quantity: Option<i64>,
}

fn validate_name(name: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    Ok(())
}

fn non_negative_price(price: i64) -> DomainResult<u64> {
    u64::try_from(price).map_err(|_| DomainError::validation("price cannot be negative"))
}

fn non_negative_quantity(quantity: i64) -> DomainResult<u32> {
    if quantity < 0 {
        return Err(DomainError::validation("quantity cannot be negative"));
    }
    u32::try_from(quantity).map_err(|_| DomainError::validation("quantity is too large"))
}
