//! Persistence layer.
//!
//! Storage is split by concern into async traits. [`Store`] bundles all of
//! them and is what the services hold as `Arc<dyn Store>`. Two backends
//! implement it: [`postgres::PgStore`] for production and
//! [`memory::MemoryStore`] for tests and local runs.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    ActivationLink, CartItem, CartLine, CartMutation, Comment, Filters, Metadata, NewComment,
    NewProduct, NewUser, Product, Registration, ShoppingSession, TokenRecord, User,
};

/// Storage result type.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The named record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("a user with this email address already exists")]
    DuplicateEmail,

    /// Optimistic-concurrency check failed: the row changed since it was read.
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("account is already activated")]
    AlreadyActivated,

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create the user, its shopping session and its activation link in one
    /// unit of work.
    async fn register_user(&self, user: &NewUser, activation_code: &str) -> Result<Registration>;

    async fn user_by_id(&self, id: i64) -> Result<User>;

    async fn user_by_email(&self, email: &str) -> Result<User>;

    /// Persist `user` if its `version` still matches; returns the stored row
    /// with the bumped version.
    async fn update_user(&self, user: &User) -> Result<User>;

    /// Delete a user together with everything it owns.
    async fn delete_user(&self, id: i64) -> Result<()>;

    async fn activation_link(&self, code: &str) -> Result<ActivationLink>;

    /// Consume an activation code and mark its user activated.
    async fn activate(&self, code: &str) -> Result<User>;
}

/// Refresh-token rows. Values are digests; see [`crate::auth::registry`].
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_token_by_user(&self, user_id: i64) -> Result<TokenRecord>;

    async fn find_token_by_digest(&self, digest: &str) -> Result<TokenRecord>;

    async fn insert_token(&self, user_id: i64, digest: &str) -> Result<TokenRecord>;

    /// Replace `old_digest` with `new_digest` on the user's row in one step.
    /// `NotFound` when the row no longer holds `old_digest`.
    async fn rotate_token(
        &self,
        user_id: i64,
        old_digest: &str,
        new_digest: &str,
    ) -> Result<TokenRecord>;

    /// Returns the number of rows deleted.
    async fn delete_token_by_digest(&self, digest: &str) -> Result<u64>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_product(&self, product: &NewProduct) -> Result<Product>;

    async fn product(&self, id: i64) -> Result<Product>;

    /// Full-text match on `name` and `category` (empty matches everything),
    /// paged and sorted by `filters`.
    async fn list_products(
        &self,
        name: &str,
        category: &str,
        filters: &Filters,
    ) -> Result<(Vec<Product>, Metadata)>;

    /// Version-checked update. A price change re-prices every cart holding
    /// the product in the same unit of work.
    async fn update_product(&self, product: &Product) -> Result<Product>;

    /// Delete a product, first taking its lines out of every cart total.
    async fn delete_product(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment>;

    async fn comment(&self, id: i64) -> Result<Comment>;

    async fn list_comments(
        &self,
        product_id: i64,
        filters: &Filters,
    ) -> Result<(Vec<Comment>, Metadata)>;

    async fn update_comment(&self, comment: &Comment) -> Result<Comment>;

    async fn delete_comment(&self, id: i64) -> Result<()>;
}

/// Shopping sessions and their items.
///
/// The three mutating calls are the only writers of `ShoppingSession.total`
/// and serialize per session: the item change and the total change commit
/// together or not at all.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn session(&self, id: i64) -> Result<ShoppingSession>;

    async fn session_by_user(&self, user_id: i64) -> Result<ShoppingSession>;

    async fn cart_items(&self, session_id: i64) -> Result<Vec<CartItem>>;

    async fn cart_item(&self, id: i64) -> Result<CartItem>;

    /// Items joined with product name and price, ordered by item id.
    async fn cart_lines(&self, session_id: i64) -> Result<Vec<CartLine>>;

    /// `Σ quantity × price` computed from the items, ignoring the cached total.
    async fn cart_total(&self, session_id: i64) -> Result<i64>;

    /// Insert an item and store the recomputed aggregate as the new total.
    async fn add_cart_item(
        &self,
        session_id: i64,
        product_id: i64,
        quantity: i64,
    ) -> Result<CartMutation>;

    /// Set a positive quantity, moving the total by `(new - old) × price`.
    async fn set_cart_item_quantity(&self, item_id: i64, quantity: i64) -> Result<CartMutation>;

    /// Delete an item, subtracting `quantity × price` from the total.
    async fn remove_cart_item(&self, item_id: i64) -> Result<CartMutation>;
}

/// Every storage concern plus a liveness check.
#[async_trait]
pub trait Store: UserStore + TokenStore + CatalogStore + CommentStore + CartStore {
    async fn ping(&self) -> Result<()>;
}

/// Signed amount a quantity change moves a total by. `None` on overflow.
pub(crate) fn line_delta(old_quantity: i64, new_quantity: i64, price: i64) -> Option<i64> {
    new_quantity.checked_sub(old_quantity)?.checked_mul(price)
}

fn overflow() -> StoreError {
    StoreError::Internal("cart amount overflow".into())
}
