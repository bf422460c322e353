//! Catalog products.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog entry. `price` is in minor currency units.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub description: String,
    pub category: String,
    /// Quantity on hand.
    pub quantity: i32,
    pub is_available: bool,
    pub creation_date: DateTime<Utc>,
    #[serde(skip)]
    pub version: i32,
}

impl Product {
    /// Set the quantity on hand and keep `is_available` in step with it.
    pub fn set_quantity(&mut self, quantity: i32) {
        self.quantity = quantity;
        self.is_available = quantity > 0;
    }
}

/// Input for creating a product.
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub name: String,
    pub price: i64,
    pub description: String,
    pub category: String,
    pub quantity: i32,
}

impl NewProduct {
    pub fn is_available(&self) -> bool {
        self.quantity > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_follows_quantity() {
        let mut product = Product {
            id: 1,
            name: "Mug".into(),
            price: 1_250,
            description: "Ceramic".into(),
            category: "kitchen".into(),
            quantity: 3,
            is_available: true,
            creation_date: Utc::now(),
            version: 1,
        };
        product.set_quantity(0);
        assert!(!product.is_available);
        product.set_quantity(2);
        assert!(product.is_available);
    }
}
