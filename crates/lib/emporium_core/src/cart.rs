//! Cart total maintenance.
//!
//! [`CartService`] is the only path through which cart items change, so a
//! session's `total` always equals `Σ quantity × price` over its items.

use std::fmt::Write;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::models::{CartItem, CartLine, CartMutation, ShoppingSession, User};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum CartError {
    #[error("quantity must be greater than zero")]
    InvalidQuantity,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a quantity change. A zero quantity removes the item.
#[derive(Debug, Clone)]
pub enum CartUpdate {
    Updated(CartMutation),
    Removed(CartMutation),
}

impl CartUpdate {
    pub fn mutation(&self) -> &CartMutation {
        match self {
            CartUpdate::Updated(m) | CartUpdate::Removed(m) => m,
        }
    }
}

/// A session with its items.
#[derive(Debug, Clone)]
pub struct Cart {
    pub session: ShoppingSession,
    pub items: Vec<CartItem>,
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
}

impl CartService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn add_item(
        &self,
        session_id: i64,
        product_id: i64,
        quantity: i64,
    ) -> Result<CartMutation, CartError> {
        if quantity <= 0 {
            return Err(CartError::InvalidQuantity);
        }
        let mutation = self
            .store
            .add_cart_item(session_id, product_id, quantity)
            .await?;
        debug!(
            session_id,
            item_id = mutation.item.id,
            total = mutation.total,
            "cart item added"
        );
        Ok(mutation)
    }

    pub async fn update_quantity(
        &self,
        item_id: i64,
        quantity: i64,
    ) -> Result<CartUpdate, CartError> {
        if quantity < 0 {
            return Err(CartError::InvalidQuantity);
        }
        if quantity == 0 {
            return Ok(CartUpdate::Removed(self.remove_item(item_id).await?));
        }
        let mutation = self.store.set_cart_item_quantity(item_id, quantity).await?;
        debug!(item_id, quantity, total = mutation.total, "cart item updated");
        Ok(CartUpdate::Updated(mutation))
    }

    pub async fn remove_item(&self, item_id: i64) -> Result<CartMutation, CartError> {
        let mutation = self.store.remove_cart_item(item_id).await?;
        debug!(item_id, total = mutation.total, "cart item removed");
        Ok(mutation)
    }

    pub async fn get_session(&self, session_id: i64) -> Result<ShoppingSession, CartError> {
        Ok(self.store.session(session_id).await?)
    }

    pub async fn session_for_user(&self, user_id: i64) -> Result<ShoppingSession, CartError> {
        Ok(self.store.session_by_user(user_id).await?)
    }

    pub async fn list_items(&self, session_id: i64) -> Result<Vec<CartItem>, CartError> {
        Ok(self.store.cart_items(session_id).await?)
    }

    pub async fn get_item(&self, item_id: i64) -> Result<CartItem, CartError> {
        Ok(self.store.cart_item(item_id).await?)
    }

    /// The user's session and its items.
    pub async fn cart_for_user(&self, user_id: i64) -> Result<Cart, CartError> {
        let session = self.session_for_user(user_id).await?;
        let items = self.list_items(session.id).await?;
        Ok(Cart { session, items })
    }

    /// Aggregate `Σ quantity × price` straight from the items.
    pub async fn recompute_total(&self, session_id: i64) -> Result<i64, CartError> {
        Ok(self.store.cart_total(session_id).await?)
    }

    /// Plain-text receipt for the user's cart.
    pub async fn receipt_for(&self, user: &User) -> Result<String, CartError> {
        let session = self.session_for_user(user.id).await?;
        let lines = self.store.cart_lines(session.id).await?;
        Ok(render_receipt(&session, user, &lines))
    }
}

/// Render minor units as a two-decimal amount (`1234` -> `12.34`).
pub fn format_amount(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

pub fn render_receipt(session: &ShoppingSession, user: &User, lines: &[CartLine]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Cart Id: {}", session.id);
    let _ = writeln!(out, "Buyer: {} {}", user.name, user.surname);
    let _ = writeln!(out, "Total: {}", format_amount(session.total));
    for (index, line) in lines.iter().enumerate() {
        let line_total = line.quantity.saturating_mul(line.unit_price);
        let _ = writeln!(
            out,
            "{}. {} => Quantity: {}, Price: {} Total: {}",
            index + 1,
            line.product_name,
            line.quantity,
            format_amount(line.unit_price),
            format_amount(line_total),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProduct, NewUser, Role};
    use crate::store::memory::MemoryStore;
    use crate::store::{CatalogStore, UserStore};
    use chrono::Utc;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: CartService,
        session_id: i64,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let reg = store
            .register_user(
                &NewUser {
                    username: "buyer".into(),
                    email: "buyer@example.com".into(),
                    password_hash: "x".into(),
                    name: "Buyer".into(),
                    ..Default::default()
                },
                "code",
            )
            .await
            .unwrap();
        Fixture {
            service: CartService::new(store.clone()),
            store,
            session_id: reg.session.id,
        }
    }

    async fn product(store: &MemoryStore, price: i64) -> i64 {
        store
            .insert_product(&NewProduct {
                name: format!("item-{price}"),
                price,
                description: "d".into(),
                category: "c".into(),
                quantity: 10,
            })
            .await
            .unwrap()
            .id
    }

    async fn assert_consistent(f: &Fixture, expected: i64) {
        let session = f.service.get_session(f.session_id).await.unwrap();
        assert_eq!(session.total, expected);
        assert_eq!(f.service.recompute_total(f.session_id).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn add_update_remove_keeps_total_in_step() {
        let f = fixture().await;
        let pid = product(&f.store, 100).await;

        let added = f.service.add_item(f.session_id, pid, 2).await.unwrap();
        assert_eq!(added.total, 200);
        assert_consistent(&f, 200).await;

        let updated = f.service.update_quantity(added.item.id, 5).await.unwrap();
        assert!(matches!(updated, CartUpdate::Updated(_)));
        assert_eq!(updated.mutation().total, 500);
        assert_consistent(&f, 500).await;

        let removed = f.service.remove_item(added.item.id).await.unwrap();
        assert_eq!(removed.total, 0);
        assert_consistent(&f, 0).await;
        assert!(f.service.list_items(f.session_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn decreasing_quantity_lowers_total() {
        let f = fixture().await;
        let pid = product(&f.store, 100).await;
        let added = f.service.add_item(f.session_id, pid, 5).await.unwrap();

        let updated = f.service.update_quantity(added.item.id, 1).await.unwrap();
        assert_eq!(updated.mutation().total, 100);
        assert_consistent(&f, 100).await;
    }

    #[tokio::test]
    async fn zero_quantity_removes_the_item() {
        let f = fixture().await;
        let pid = product(&f.store, 250).await;
        let added = f.service.add_item(f.session_id, pid, 2).await.unwrap();

        let update = f.service.update_quantity(added.item.id, 0).await.unwrap();
        assert!(matches!(update, CartUpdate::Removed(_)));
        assert!(matches!(
            f.service.get_item(added.item.id).await,
            Err(CartError::Store(StoreError::NotFound(_)))
        ));
        assert_consistent(&f, 0).await;
    }

    #[tokio::test]
    async fn invalid_quantities_change_nothing() {
        let f = fixture().await;
        let pid = product(&f.store, 100).await;
        let added = f.service.add_item(f.session_id, pid, 1).await.unwrap();

        assert!(matches!(
            f.service.add_item(f.session_id, pid, 0).await,
            Err(CartError::InvalidQuantity)
        ));
        assert!(matches!(
            f.service.add_item(f.session_id, pid, -3).await,
            Err(CartError::InvalidQuantity)
        ));
        assert!(matches!(
            f.service.update_quantity(added.item.id, -1).await,
            Err(CartError::InvalidQuantity)
        ));
        assert_consistent(&f, 100).await;
    }

    #[tokio::test]
    async fn missing_product_or_session_is_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.service.add_item(f.session_id, 404, 1).await,
            Err(CartError::Store(StoreError::NotFound("product")))
        ));
        let pid = product(&f.store, 100).await;
        assert!(matches!(
            f.service.add_item(404, pid, 1).await,
            Err(CartError::Store(StoreError::NotFound("shopping session")))
        ));
        assert_consistent(&f, 0).await;
    }

    #[tokio::test]
    async fn many_lines_sum_up() {
        let f = fixture().await;
        let a = product(&f.store, 199).await;
        let b = product(&f.store, 1_000).await;
        f.service.add_item(f.session_id, a, 3).await.unwrap();
        let second = f.service.add_item(f.session_id, b, 2).await.unwrap();
        assert_eq!(second.total, 597 + 2_000);
        assert_consistent(&f, 2_597).await;
    }

    #[tokio::test]
    async fn concurrent_updates_serialize() {
        let f = fixture().await;
        let pid = product(&f.store, 10).await;
        let mut items = Vec::new();
        for _ in 0..8 {
            items.push(f.service.add_item(f.session_id, pid, 1).await.unwrap().item.id);
        }

        let handles: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(n, &item_id)| {
                let service = f.service.clone();
                tokio::spawn(async move {
                    service.update_quantity(item_id, (n as i64 % 3) + 1).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let expected = f.service.recompute_total(f.session_id).await.unwrap();
        let session = f.service.get_session(f.session_id).await.unwrap();
        assert_eq!(session.total, expected);
    }

    #[test]
    fn amounts_have_two_decimals() {
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(1_234), "12.34");
        assert_eq!(format_amount(-250), "-2.50");
    }

    #[test]
    fn receipt_lists_every_line() {
        let session = ShoppingSession {
            id: 3,
            user_id: 1,
            total: 2_597,
            creation_date: Utc::now(),
        };
        let user = User {
            id: 1,
            role: Role::User,
            username: "buyer".into(),
            email: "buyer@example.com".into(),
            phone_number: String::new(),
            password_hash: String::new(),
            registration_date: Utc::now(),
            name: "Ada".into(),
            surname: "Lovelace".into(),
            date_of_birth: None,
            address: String::new(),
            about_me: String::new(),
            picture_url: String::new(),
            activated: true,
            version: 1,
        };
        let lines = vec![
            CartLine {
                item_id: 1,
                product_id: 10,
                product_name: "Mug".into(),
                unit_price: 199,
                quantity: 3,
            },
            CartLine {
                item_id: 2,
                product_id: 11,
                product_name: "Lamp".into(),
                unit_price: 1_000,
                quantity: 2,
            },
        ];

        let receipt = render_receipt(&session, &user, &lines);
        assert_eq!(
            receipt,
            "Cart Id: 3\n\
             Buyer: Ada Lovelace\n\
             Total: 25.97\n\
             1. Mug => Quantity: 3, Price: 1.99 Total: 5.97\n\
             2. Lamp => Quantity: 2, Price: 10.00 Total: 20.00\n"
        );
    }
}
