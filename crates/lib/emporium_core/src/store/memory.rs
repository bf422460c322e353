//! In-memory store used by tests and local runs.
//!
//! All state sits behind one mutex, so every trait call is a single unit of
//! work and cart mutations serialize for free.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    CartStore, CatalogStore, CommentStore, Result, Store, StoreError, TokenStore, UserStore,
    line_delta, overflow,
};
use crate::models::{
    ActivationLink, CartItem, CartLine, CartMutation, Comment, Filters, Metadata, NewComment,
    NewProduct, NewUser, Product, Registration, Role, ShoppingSession, TokenRecord, User,
};

#[derive(Default)]
struct Sequences {
    users: i64,
    tokens: i64,
    products: i64,
    sessions: i64,
    items: i64,
    comments: i64,
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[derive(Default)]
struct Data {
    seq: Sequences,
    users: BTreeMap<i64, User>,
    activation_links: HashMap<String, ActivationLink>,
    tokens: BTreeMap<i64, TokenRecord>,
    products: BTreeMap<i64, Product>,
    sessions: BTreeMap<i64, ShoppingSession>,
    items: BTreeMap<i64, CartItem>,
    comments: BTreeMap<i64, Comment>,
}

impl Data {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn aggregate_total(&self, session_id: i64) -> Result<i64> {
        self.items
            .values()
            .filter(|i| i.session_id == session_id)
            .try_fold(0i64, |acc, item| {
                let price = self
                    .products
                    .get(&item.product_id)
                    .map(|p| p.price)
                    .ok_or(StoreError::NotFound("product"))?;
                item.quantity
                    .checked_mul(price)
                    .and_then(|line| acc.checked_add(line))
                    .ok_or_else(overflow)
            })
    }

    fn adjust_total(&mut self, session_id: i64, delta: i64) -> Result<i64> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound("shopping session"))?;
        session.total = session.total.checked_add(delta).ok_or_else(overflow)?;
        Ok(session.total)
    }

    /// Apply per-session deltas all-or-nothing: every new total is computed
    /// before any session changes.
    fn apply_deltas(&mut self, deltas: &BTreeMap<i64, i64>) -> Result<()> {
        let mut totals = Vec::with_capacity(deltas.len());
        for (&session_id, &delta) in deltas {
            let session = self
                .sessions
                .get(&session_id)
                .ok_or(StoreError::NotFound("shopping session"))?;
            totals.push((session_id, session.total.checked_add(delta).ok_or_else(overflow)?));
        }
        for (session_id, total) in totals {
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.total = total;
            }
        }
        Ok(())
    }

    fn price_of(&self, product_id: i64) -> Result<i64> {
        self.products
            .get(&product_id)
            .map(|p| p.price)
            .ok_or(StoreError::NotFound("product"))
    }
}

pub struct MemoryStore {
    data: Mutex<Data>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Data::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Every word of `query` occurs as a word of `field`. An empty query matches.
fn text_matches(field: &str, query: &str) -> bool {
    let haystack = words(field);
    words(query).iter().all(|w| haystack.contains(w))
}

fn paginate<T>(mut rows: Vec<T>, filters: &Filters) -> (Vec<T>, Metadata) {
    let total = rows.len() as i64;
    let metadata = Metadata::calculate(total, filters.page, filters.page_size);
    let offset = filters.offset().clamp(0, total) as usize;
    let limit = filters.limit().max(0) as usize;
    let page = rows.drain(offset..).take(limit).collect();
    (page, metadata)
}

fn directed(ordering: Ordering, filters: &Filters) -> Ordering {
    if filters.sort_direction() == "DESC" {
        ordering.reverse()
    } else {
        ordering
    }
}

fn compare_products(a: &Product, b: &Product, filters: &Filters) -> Ordering {
    let primary = match filters.sort_column() {
        "name" => a.name.cmp(&b.name),
        "category" => a.category.cmp(&b.category),
        "price" => a.price.cmp(&b.price),
        "is_available" => a.is_available.cmp(&b.is_available),
        "creation_date" => a.creation_date.cmp(&b.creation_date),
        _ => a.id.cmp(&b.id),
    };
    directed(primary, filters).then(a.id.cmp(&b.id))
}

fn compare_comments(a: &Comment, b: &Comment, filters: &Filters) -> Ordering {
    let primary = match filters.sort_column() {
        "text" => a.text.cmp(&b.text),
        "creation_date" => a.creation_date.cmp(&b.creation_date),
        _ => a.id.cmp(&b.id),
    };
    directed(primary, filters).then(a.id.cmp(&b.id))
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn register_user(&self, new: &NewUser, activation_code: &str) -> Result<Registration> {
        let mut data = self.data.lock().await;
        if data.email_taken(&new.email, None) {
            return Err(StoreError::DuplicateEmail);
        }
        let now = Utc::now();

        let user = User {
            id: next(&mut data.seq.users),
            role: Role::User,
            username: new.username.clone(),
            email: new.email.clone(),
            phone_number: new.phone_number.clone(),
            password_hash: new.password_hash.clone(),
            registration_date: now,
            name: new.name.clone(),
            surname: new.surname.clone(),
            date_of_birth: new.date_of_birth,
            address: new.address.clone(),
            about_me: new.about_me.clone(),
            picture_url: String::new(),
            activated: false,
            version: 1,
        };
        let session = ShoppingSession {
            id: next(&mut data.seq.sessions),
            user_id: user.id,
            total: 0,
            creation_date: now,
        };
        let activation = ActivationLink {
            link: activation_code.to_string(),
            activated: false,
            user_id: user.id,
            creation_date: now,
        };

        data.users.insert(user.id, user.clone());
        data.sessions.insert(session.id, session.clone());
        data.activation_links
            .insert(activation.link.clone(), activation.clone());
        debug!(user_id = user.id, "registered user");

        Ok(Registration {
            user,
            session,
            activation,
        })
    }

    async fn user_by_id(&self, id: i64) -> Result<User> {
        let data = self.data.lock().await;
        data.users.get(&id).cloned().ok_or(StoreError::NotFound("user"))
    }

    async fn user_by_email(&self, email: &str) -> Result<User> {
        let data = self.data.lock().await;
        data.users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound("user"))
    }

    async fn update_user(&self, user: &User) -> Result<User> {
        if !user.role.is_assignable() {
            return Err(StoreError::Internal(format!(
                "role {} can not be stored",
                user.role
            )));
        }
        let mut data = self.data.lock().await;
        if data.email_taken(&user.email, Some(user.id)) {
            return Err(StoreError::DuplicateEmail);
        }
        let stored = data
            .users
            .get_mut(&user.id)
            .ok_or(StoreError::EditConflict)?;
        if stored.version != user.version {
            return Err(StoreError::EditConflict);
        }
        let mut updated = user.clone();
        updated.registration_date = stored.registration_date;
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        let mut data = self.data.lock().await;
        if data.users.remove(&id).is_none() {
            return Err(StoreError::NotFound("user"));
        }
        let sessions: Vec<i64> = data
            .sessions
            .values()
            .filter(|s| s.user_id == id)
            .map(|s| s.id)
            .collect();
        data.items.retain(|_, i| !sessions.contains(&i.session_id));
        data.sessions.retain(|_, s| s.user_id != id);
        data.tokens.retain(|_, t| t.user_id != id);
        data.activation_links.retain(|_, l| l.user_id != id);
        data.comments.retain(|_, c| c.owner_id != id);
        Ok(())
    }

    async fn activation_link(&self, code: &str) -> Result<ActivationLink> {
        let data = self.data.lock().await;
        data.activation_links
            .get(code)
            .cloned()
            .ok_or(StoreError::NotFound("activation link"))
    }

    async fn activate(&self, code: &str) -> Result<User> {
        let mut data = self.data.lock().await;
        let link = data
            .activation_links
            .get_mut(code)
            .ok_or(StoreError::NotFound("activation link"))?;
        if link.activated {
            return Err(StoreError::AlreadyActivated);
        }
        link.activated = true;
        let user_id = link.user_id;

        let user = data
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound("user"))?;
        user.activated = true;
        user.version += 1;
        Ok(user.clone())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn find_token_by_user(&self, user_id: i64) -> Result<TokenRecord> {
        let data = self.data.lock().await;
        data.tokens
            .values()
            .find(|t| t.user_id == user_id)
            .cloned()
            .ok_or(StoreError::NotFound("refresh token"))
    }

    async fn find_token_by_digest(&self, digest: &str) -> Result<TokenRecord> {
        let data = self.data.lock().await;
        data.tokens
            .values()
            .find(|t| t.refresh_token == digest)
            .cloned()
            .ok_or(StoreError::NotFound("refresh token"))
    }

    async fn insert_token(&self, user_id: i64, digest: &str) -> Result<TokenRecord> {
        let mut data = self.data.lock().await;
        // Same upsert-on-user semantics as the unique constraint in PostgreSQL.
        if let Some(existing) = data.tokens.values_mut().find(|t| t.user_id == user_id) {
            existing.refresh_token = digest.to_string();
            return Ok(existing.clone());
        }
        let record = TokenRecord {
            id: next(&mut data.seq.tokens),
            user_id,
            refresh_token: digest.to_string(),
        };
        data.tokens.insert(record.id, record.clone());
        Ok(record)
    }

    async fn rotate_token(
        &self,
        user_id: i64,
        old_digest: &str,
        new_digest: &str,
    ) -> Result<TokenRecord> {
        let mut data = self.data.lock().await;
        let record = data
            .tokens
            .values_mut()
            .find(|t| t.user_id == user_id && t.refresh_token == old_digest)
            .ok_or(StoreError::NotFound("refresh token"))?;
        record.refresh_token = new_digest.to_string();
        Ok(record.clone())
    }

    async fn delete_token_by_digest(&self, digest: &str) -> Result<u64> {
        let mut data = self.data.lock().await;
        let before = data.tokens.len();
        data.tokens.retain(|_, t| t.refresh_token != digest);
        Ok((before - data.tokens.len()) as u64)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_product(&self, new: &NewProduct) -> Result<Product> {
        let mut data = self.data.lock().await;
        let product = Product {
            id: next(&mut data.seq.products),
            name: new.name.clone(),
            price: new.price,
            description: new.description.clone(),
            category: new.category.clone(),
            quantity: new.quantity,
            is_available: new.is_available(),
            creation_date: Utc::now(),
            version: 1,
        };
        data.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn product(&self, id: i64) -> Result<Product> {
        let data = self.data.lock().await;
        data.products
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("product"))
    }

    async fn list_products(
        &self,
        name: &str,
        category: &str,
        filters: &Filters,
    ) -> Result<(Vec<Product>, Metadata)> {
        let data = self.data.lock().await;
        let mut rows: Vec<Product> = data
            .products
            .values()
            .filter(|p| text_matches(&p.name, name) && text_matches(&p.category, category))
            .cloned()
            .collect();
        rows.sort_by(|a, b| compare_products(a, b, filters));
        Ok(paginate(rows, filters))
    }

    async fn update_product(&self, product: &Product) -> Result<Product> {
        let mut data = self.data.lock().await;
        let stored = data
            .products
            .get(&product.id)
            .ok_or(StoreError::EditConflict)?;
        if stored.version != product.version {
            return Err(StoreError::EditConflict);
        }
        let old_price = stored.price;

        if product.price != old_price {
            let price_delta = product.price.checked_sub(old_price).ok_or_else(overflow)?;
            let mut deltas: BTreeMap<i64, i64> = BTreeMap::new();
            for item in data.items.values().filter(|i| i.product_id == product.id) {
                let line = item.quantity.checked_mul(price_delta).ok_or_else(overflow)?;
                let entry = deltas.entry(item.session_id).or_default();
                *entry = entry.checked_add(line).ok_or_else(overflow)?;
            }
            data.apply_deltas(&deltas)?;
        }

        let mut updated = product.clone();
        updated.is_available = updated.quantity > 0;
        updated.version += 1;
        data.products.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn delete_product(&self, id: i64) -> Result<()> {
        let mut data = self.data.lock().await;
        let price = data.price_of(id)?;
        let mut deltas: BTreeMap<i64, i64> = BTreeMap::new();
        for item in data.items.values().filter(|i| i.product_id == id) {
            let line = item.quantity.checked_mul(price).ok_or_else(overflow)?;
            let entry = deltas.entry(item.session_id).or_default();
            *entry = entry.checked_sub(line).ok_or_else(overflow)?;
        }
        data.apply_deltas(&deltas)?;
        data.items.retain(|_, i| i.product_id != id);
        data.comments.retain(|_, c| c.product_id != id);
        data.products.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl CommentStore for MemoryStore {
    async fn insert_comment(&self, new: &NewComment) -> Result<Comment> {
        let mut data = self.data.lock().await;
        if !data.products.contains_key(&new.product_id) {
            return Err(StoreError::NotFound("product"));
        }
        let comment = Comment {
            id: next(&mut data.seq.comments),
            product_id: new.product_id,
            owner_id: new.owner_id,
            text: new.text.clone(),
            creation_date: Utc::now(),
            version: 1,
        };
        data.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn comment(&self, id: i64) -> Result<Comment> {
        let data = self.data.lock().await;
        data.comments
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("comment"))
    }

    async fn list_comments(
        &self,
        product_id: i64,
        filters: &Filters,
    ) -> Result<(Vec<Comment>, Metadata)> {
        let data = self.data.lock().await;
        let mut rows: Vec<Comment> = data
            .comments
            .values()
            .filter(|c| c.product_id == product_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| compare_comments(a, b, filters));
        Ok(paginate(rows, filters))
    }

    async fn update_comment(&self, comment: &Comment) -> Result<Comment> {
        let mut data = self.data.lock().await;
        let stored = data
            .comments
            .get_mut(&comment.id)
            .ok_or(StoreError::EditConflict)?;
        if stored.version != comment.version {
            return Err(StoreError::EditConflict);
        }
        stored.text = comment.text.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete_comment(&self, id: i64) -> Result<()> {
        let mut data = self.data.lock().await;
        data.comments
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound("comment"))
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn session(&self, id: i64) -> Result<ShoppingSession> {
        let data = self.data.lock().await;
        data.sessions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("shopping session"))
    }

    async fn session_by_user(&self, user_id: i64) -> Result<ShoppingSession> {
        let data = self.data.lock().await;
        data.sessions
            .values()
            .find(|s| s.user_id == user_id)
            .cloned()
            .ok_or(StoreError::NotFound("shopping session"))
    }

    async fn cart_items(&self, session_id: i64) -> Result<Vec<CartItem>> {
        let data = self.data.lock().await;
        Ok(data
            .items
            .values()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn cart_item(&self, id: i64) -> Result<CartItem> {
        let data = self.data.lock().await;
        data.items
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("cart item"))
    }

    async fn cart_lines(&self, session_id: i64) -> Result<Vec<CartLine>> {
        let data = self.data.lock().await;
        data.items
            .values()
            .filter(|i| i.session_id == session_id)
            .map(|item| {
                let product = data
                    .products
                    .get(&item.product_id)
                    .ok_or(StoreError::NotFound("product"))?;
                Ok::<_, StoreError>(CartLine {
                    item_id: item.id,
                    product_id: product.id,
                    product_name: product.name.clone(),
                    unit_price: product.price,
                    quantity: item.quantity,
                })
            })
            .collect()
    }

    async fn cart_total(&self, session_id: i64) -> Result<i64> {
        let data = self.data.lock().await;
        if !data.sessions.contains_key(&session_id) {
            return Err(StoreError::NotFound("shopping session"));
        }
        data.aggregate_total(session_id)
    }

    async fn add_cart_item(
        &self,
        session_id: i64,
        product_id: i64,
        quantity: i64,
    ) -> Result<CartMutation> {
        let mut data = self.data.lock().await;
        data.price_of(product_id)?;
        if !data.sessions.contains_key(&session_id) {
            return Err(StoreError::NotFound("shopping session"));
        }

        let item = CartItem {
            id: next(&mut data.seq.items),
            session_id,
            product_id,
            quantity,
            creation_date: Utc::now(),
        };
        data.items.insert(item.id, item.clone());

        let total = match data.aggregate_total(session_id) {
            Ok(total) => total,
            Err(e) => {
                data.items.remove(&item.id);
                return Err(e);
            }
        };
        if let Some(session) = data.sessions.get_mut(&session_id) {
            session.total = total;
        }
        Ok(CartMutation { item, total })
    }

    async fn set_cart_item_quantity(&self, item_id: i64, quantity: i64) -> Result<CartMutation> {
        let mut data = self.data.lock().await;
        let item = data
            .items
            .get(&item_id)
            .cloned()
            .ok_or(StoreError::NotFound("cart item"))?;
        let price = data.price_of(item.product_id)?;
        let delta = line_delta(item.quantity, quantity, price).ok_or_else(overflow)?;

        let total = data.adjust_total(item.session_id, delta)?;
        let updated = CartItem { quantity, ..item };
        data.items.insert(updated.id, updated.clone());
        Ok(CartMutation {
            item: updated,
            total,
        })
    }

    async fn remove_cart_item(&self, item_id: i64) -> Result<CartMutation> {
        let mut data = self.data.lock().await;
        let item = data
            .items
            .get(&item_id)
            .cloned()
            .ok_or(StoreError::NotFound("cart item"))?;
        let price = data.price_of(item.product_id)?;
        let line = item.quantity.checked_mul(price).ok_or_else(overflow)?;

        let total = data.adjust_total(item.session_id, -line)?;
        data.items.remove(&item_id);
        Ok(CartMutation { item, total })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::filters::{COMMENT_SORT_SAFELIST, PRODUCT_SORT_SAFELIST};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            username: "tester".into(),
            email: email.into(),
            password_hash: "hash".into(),
            name: "Test".into(),
            ..Default::default()
        }
    }

    fn new_product(name: &str, category: &str, price: i64) -> NewProduct {
        NewProduct {
            name: name.into(),
            price,
            description: "desc".into(),
            category: category.into(),
            quantity: 5,
        }
    }

    #[tokio::test]
    async fn registration_creates_session_and_link() {
        let store = MemoryStore::new();
        let reg = store.register_user(&new_user("a@b.io"), "code1").await.unwrap();
        assert_eq!(reg.user.role, Role::User);
        assert!(!reg.user.activated);
        assert_eq!(reg.session.user_id, reg.user.id);
        assert_eq!(reg.session.total, 0);
        assert_eq!(reg.activation.user_id, reg.user.id);
        assert_eq!(
            store.session_by_user(reg.user.id).await.unwrap().id,
            reg.session.id
        );
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        store.register_user(&new_user("a@b.io"), "c1").await.unwrap();
        assert!(matches!(
            store.register_user(&new_user("a@b.io"), "c2").await,
            Err(StoreError::DuplicateEmail)
        ));
    }

    #[tokio::test]
    async fn activation_is_single_use() {
        let store = MemoryStore::new();
        store.register_user(&new_user("a@b.io"), "c1").await.unwrap();
        let user = store.activate("c1").await.unwrap();
        assert!(user.activated);
        assert!(matches!(
            store.activate("c1").await,
            Err(StoreError::AlreadyActivated)
        ));
        assert!(matches!(
            store.activate("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stale_version_is_an_edit_conflict() {
        let store = MemoryStore::new();
        let reg = store.register_user(&new_user("a@b.io"), "c1").await.unwrap();
        let mut first = reg.user.clone();
        first.name = "First".into();
        let saved = store.update_user(&first).await.unwrap();
        assert_eq!(saved.version, reg.user.version + 1);

        let mut stale = reg.user.clone();
        stale.name = "Second".into();
        assert!(matches!(
            store.update_user(&stale).await,
            Err(StoreError::EditConflict)
        ));
    }

    #[tokio::test]
    async fn owner_role_is_never_stored() {
        let store = MemoryStore::new();
        let reg = store.register_user(&new_user("a@b.io"), "c1").await.unwrap();
        let mut user = reg.user.clone();
        user.role = Role::Owner;
        assert!(store.update_user(&user).await.is_err());
    }

    #[tokio::test]
    async fn deleting_a_user_cascades() {
        let store = MemoryStore::new();
        let reg = store.register_user(&new_user("a@b.io"), "c1").await.unwrap();
        let product = store.insert_product(&new_product("Mug", "kitchen", 100)).await.unwrap();
        store
            .add_cart_item(reg.session.id, product.id, 1)
            .await
            .unwrap();
        store.insert_token(reg.user.id, "digest").await.unwrap();

        store.delete_user(reg.user.id).await.unwrap();
        assert!(store.session(reg.session.id).await.is_err());
        assert!(store.find_token_by_user(reg.user.id).await.is_err());
        assert!(store.cart_items(reg.session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn product_search_matches_words() {
        let store = MemoryStore::new();
        store.insert_product(&new_product("Blue Coffee Mug", "kitchen", 100)).await.unwrap();
        store.insert_product(&new_product("Red Mug", "kitchen", 200)).await.unwrap();
        store.insert_product(&new_product("Desk Lamp", "office", 300)).await.unwrap();

        let filters = Filters::new(1, 20, "id", PRODUCT_SORT_SAFELIST);
        let (rows, meta) = store.list_products("mug", "", &filters).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(meta.total_records, 2);

        let (rows, _) = store.list_products("coffee mug", "kitchen", &filters).await.unwrap();
        assert_eq!(rows.len(), 1);

        let (rows, meta) = store.list_products("chair", "", &filters).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(meta, Metadata::default());
    }

    #[tokio::test]
    async fn product_listing_sorts_and_pages() {
        let store = MemoryStore::new();
        for (name, price) in [("A", 300), ("B", 100), ("C", 200)] {
            store.insert_product(&new_product(name, "misc", price)).await.unwrap();
        }
        let filters = Filters::new(1, 2, "-price", PRODUCT_SORT_SAFELIST);
        let (rows, meta) = store.list_products("", "", &filters).await.unwrap();
        let prices: Vec<i64> = rows.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![300, 200]);
        assert_eq!(meta.last_page, 2);

        let filters = Filters::new(2, 2, "-price", PRODUCT_SORT_SAFELIST);
        let (rows, _) = store.list_products("", "", &filters).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 100);
    }

    #[tokio::test]
    async fn price_change_reprices_carts() {
        let store = MemoryStore::new();
        let reg = store.register_user(&new_user("a@b.io"), "c1").await.unwrap();
        let product = store.insert_product(&new_product("Mug", "kitchen", 100)).await.unwrap();
        store.add_cart_item(reg.session.id, product.id, 3).await.unwrap();

        let mut changed = product.clone();
        changed.price = 150;
        store.update_product(&changed).await.unwrap();

        let session = store.session(reg.session.id).await.unwrap();
        assert_eq!(session.total, 450);
        assert_eq!(store.cart_total(reg.session.id).await.unwrap(), 450);
    }

    #[tokio::test]
    async fn product_delete_takes_lines_out_of_totals() {
        let store = MemoryStore::new();
        let reg = store.register_user(&new_user("a@b.io"), "c1").await.unwrap();
        let mug = store.insert_product(&new_product("Mug", "kitchen", 100)).await.unwrap();
        let lamp = store.insert_product(&new_product("Lamp", "office", 250)).await.unwrap();
        store.add_cart_item(reg.session.id, mug.id, 2).await.unwrap();
        store.add_cart_item(reg.session.id, lamp.id, 1).await.unwrap();

        store.delete_product(mug.id).await.unwrap();
        let session = store.session(reg.session.id).await.unwrap();
        assert_eq!(session.total, 250);
        assert_eq!(store.cart_items(reg.session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_reprice_leaves_every_cart_untouched() {
        let store = MemoryStore::new();
        let a = store.register_user(&new_user("a@b.io"), "ca").await.unwrap().session.id;
        let b = store.register_user(&new_user("b@b.io"), "cb").await.unwrap().session.id;
        let pin = store.insert_product(&new_product("Pin", "misc", 1)).await.unwrap();
        let yacht = store
            .insert_product(&new_product("Yacht", "boats", i64::MAX - 10))
            .await
            .unwrap();
        store.add_cart_item(a, pin.id, 1).await.unwrap();
        store.add_cart_item(b, yacht.id, 1).await.unwrap();
        store.add_cart_item(b, pin.id, 1).await.unwrap();

        let mut repriced = pin.clone();
        repriced.price = 100;
        assert!(matches!(
            store.update_product(&repriced).await,
            Err(StoreError::Internal(_))
        ));

        assert_eq!(store.product(pin.id).await.unwrap().price, 1);
        for session_id in [a, b] {
            let cached = store.session(session_id).await.unwrap().total;
            assert_eq!(cached, store.cart_total(session_id).await.unwrap());
        }
        assert_eq!(store.session(a).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn cart_mutations_reject_unknown_rows() {
        let store = MemoryStore::new();
        let reg = store.register_user(&new_user("a@b.io"), "c1").await.unwrap();
        assert!(matches!(
            store.add_cart_item(reg.session.id, 99, 1).await,
            Err(StoreError::NotFound("product"))
        ));
        let product = store.insert_product(&new_product("Mug", "kitchen", 100)).await.unwrap();
        assert!(matches!(
            store.add_cart_item(99, product.id, 1).await,
            Err(StoreError::NotFound("shopping session"))
        ));
        assert!(matches!(
            store.set_cart_item_quantity(99, 1).await,
            Err(StoreError::NotFound("cart item"))
        ));
        assert!(matches!(
            store.remove_cart_item(99).await,
            Err(StoreError::NotFound("cart item"))
        ));
    }

    #[tokio::test]
    async fn comments_list_per_product() {
        let store = MemoryStore::new();
        let mug = store.insert_product(&new_product("Mug", "kitchen", 100)).await.unwrap();
        let lamp = store.insert_product(&new_product("Lamp", "office", 250)).await.unwrap();
        for text in ["b", "a"] {
            store
                .insert_comment(&NewComment {
                    product_id: mug.id,
                    owner_id: 1,
                    text: text.into(),
                })
                .await
                .unwrap();
        }
        store
            .insert_comment(&NewComment {
                product_id: lamp.id,
                owner_id: 1,
                text: "c".into(),
            })
            .await
            .unwrap();

        let filters = Filters::new(1, 10, "text", COMMENT_SORT_SAFELIST);
        let (rows, meta) = store.list_comments(mug.id, &filters).await.unwrap();
        let texts: Vec<&str> = rows.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(meta.total_records, 2);
    }

    #[test]
    fn text_matching_is_word_based() {
        assert!(text_matches("Blue Coffee Mug", ""));
        assert!(text_matches("Blue Coffee Mug", "mug blue"));
        assert!(!text_matches("Blue Coffee Mug", "mu"));
    }
}
