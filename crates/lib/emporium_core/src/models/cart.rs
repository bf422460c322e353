//! Shopping sessions (carts) and their line items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's cart. `total` caches `Σ quantity × price` over its items.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShoppingSession {
    pub id: i64,
    pub user_id: i64,
    pub total: i64,
    pub creation_date: DateTime<Utc>,
}

/// One product line in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CartItem {
    pub id: i64,
    pub session_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub creation_date: DateTime<Utc>,
}

/// Cart item joined with the product fields a receipt needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CartLine {
    pub item_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub unit_price: i64,
    pub quantity: i64,
}

/// Result of a cart unit of work: the affected item and the session total
/// after the change was committed.
#[derive(Debug, Clone)]
pub struct CartMutation {
    pub item: CartItem,
    pub total: i64,
}
