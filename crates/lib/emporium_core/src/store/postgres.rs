//! PostgreSQL store.
//!
//! Every call runs under a per-call timeout. Cart and catalog writes that
//! touch `shopping_sessions.total` take row locks in a fixed order
//! (product, then session, then item) so concurrent units of work on the same
//! cart serialize without deadlocking.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use super::{
    CartStore, CatalogStore, CommentStore, Result, Store, StoreError, TokenStore, UserStore,
    line_delta, overflow,
};
use crate::models::{
    ActivationLink, CartItem, CartLine, CartMutation, Comment, Filters, Metadata, NewComment,
    NewProduct, NewUser, Product, Registration, ShoppingSession, TokenRecord, User,
};

/// Default upper bound for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

const USER_COLUMNS: &str = "id, role, username, email, phone_number, password_hash, \
     registration_date, name, surname, date_of_birth, address, about_me, picture_url, \
     activated, version";

const PRODUCT_COLUMNS: &str =
    "id, name, price, description, category, quantity, is_available, creation_date, version";

const COMMENT_COLUMNS: &str = "id, product_id, owner_id, text, creation_date, version";

const ITEM_COLUMNS: &str = "id, session_id, product_id, quantity, creation_date";

const SESSION_COLUMNS: &str = "id, user_id, total, creation_date";

/// `users` row. The role is stored as text and parsed on the way out.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    role: String,
    username: String,
    email: String,
    phone_number: String,
    password_hash: String,
    registration_date: DateTime<Utc>,
    name: String,
    surname: String,
    date_of_birth: Option<NaiveDate>,
    address: String,
    about_me: String,
    picture_url: String,
    activated: bool,
    version: i32,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            role: row.role.parse().map_err(StoreError::Internal)?,
            username: row.username,
            email: row.email,
            phone_number: row.phone_number,
            password_hash: row.password_hash,
            registration_date: row.registration_date,
            name: row.name,
            surname: row.surname,
            date_of_birth: row.date_of_birth,
            address: row.address,
            about_me: row.about_me,
            picture_url: row.picture_url,
            activated: row.activated,
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProductPageRow {
    total_records: i64,
    #[sqlx(flatten)]
    product: Product,
}

#[derive(sqlx::FromRow)]
struct CommentPageRow {
    total_records: i64,
    #[sqlx(flatten)]
    comment: Comment,
}

/// Turn a unique violation on the email constraint into `DuplicateEmail`.
fn email_conflict(e: StoreError) -> StoreError {
    match e {
        StoreError::Database(sqlx::Error::Database(ref db))
            if db.constraint() == Some("users_email_key") =>
        {
            StoreError::DuplicateEmail
        }
        other => other,
    }
}

fn page_metadata(first_row_total: Option<i64>, filters: &Filters) -> Metadata {
    Metadata::calculate(
        first_row_total.unwrap_or(0),
        filters.page,
        filters.page_size,
    )
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `fut` under the store timeout.
    async fn timed<T, E, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        StoreError: From<E>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => {
                warn!(timeout = ?self.timeout, "store call timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

/// Lock a product row shared and return its price.
async fn lock_product_price(tx: &mut Transaction<'_, Postgres>, product_id: i64) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT price FROM products WHERE id = $1 FOR SHARE")
        .bind(product_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::NotFound("product"))
}

/// Lock a session row for update. All writers of `total` go through here.
async fn lock_session(tx: &mut Transaction<'_, Postgres>, session_id: i64) -> Result<()> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM shopping_sessions WHERE id = $1 FOR UPDATE")
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await?
        .map(|_| ())
        .ok_or(StoreError::NotFound("shopping session"))
}

async fn apply_delta(
    tx: &mut Transaction<'_, Postgres>,
    session_id: i64,
    delta: i64,
) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>(
        "UPDATE shopping_sessions SET total = total + $2 WHERE id = $1 RETURNING total",
    )
    .bind(session_id)
    .bind(delta)
    .fetch_one(&mut **tx)
    .await?)
}

/// Look up an item, take the product and session locks in order, then
/// re-read the item under lock. Returns the item as of the locked read and
/// the unit price.
async fn lock_item(tx: &mut Transaction<'_, Postgres>, item_id: i64) -> Result<(CartItem, i64)> {
    let (session_id, product_id) = sqlx::query_as::<_, (i64, i64)>(
        "SELECT session_id, product_id FROM cart_items WHERE id = $1",
    )
    .bind(item_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::NotFound("cart item"))?;

    let price = lock_product_price(tx, product_id).await?;
    lock_session(tx, session_id).await?;

    let item = sqlx::query_as::<_, CartItem>(&format!(
        "SELECT {ITEM_COLUMNS} FROM cart_items WHERE id = $1 FOR UPDATE"
    ))
    .bind(item_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::NotFound("cart item"))?;
    Ok((item, price))
}

#[async_trait]
impl UserStore for PgStore {
    async fn register_user(&self, new: &NewUser, activation_code: &str) -> Result<Registration> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, UserRow>(&format!(
                "INSERT INTO users (username, email, phone_number, password_hash, name, surname, \
                 date_of_birth, address, about_me) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 RETURNING {USER_COLUMNS}"
            ))
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.phone_number)
            .bind(&new.password_hash)
            .bind(&new.name)
            .bind(&new.surname)
            .bind(new.date_of_birth)
            .bind(&new.address)
            .bind(&new.about_me)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| email_conflict(e.into()))?;
            let user = User::try_from(row)?;

            let session = sqlx::query_as::<_, ShoppingSession>(&format!(
                "INSERT INTO shopping_sessions (user_id) VALUES ($1) RETURNING {SESSION_COLUMNS}"
            ))
            .bind(user.id)
            .fetch_one(&mut *tx)
            .await?;

            let activation = sqlx::query_as::<_, ActivationLink>(
                "INSERT INTO activation_links (link, user_id) VALUES ($1, $2) \
                 RETURNING link, activated, user_id, creation_date",
            )
            .bind(activation_code)
            .bind(user.id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            debug!(user_id = user.id, session_id = session.id, "registered user");
            Ok::<_, StoreError>(Registration {
                user,
                session,
                activation,
            })
        })
        .await
    }

    async fn user_by_id(&self, id: i64) -> Result<User> {
        self.timed(
            sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("user"))?
        .try_into()
    }

    async fn user_by_email(&self, email: &str) -> Result<User> {
        self.timed(
            sqlx::query_as::<_, UserRow>(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
            ))
            .bind(email)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("user"))?
        .try_into()
    }

    async fn update_user(&self, user: &User) -> Result<User> {
        let sql = format!(
            "UPDATE users SET role = $1, username = $2, email = $3, phone_number = $4, \
             password_hash = $5, name = $6, surname = $7, date_of_birth = $8, address = $9, \
             about_me = $10, picture_url = $11, activated = $12, version = version + 1 \
             WHERE id = $13 AND version = $14 \
             RETURNING {USER_COLUMNS}"
        );
        let row = self
            .timed(
                sqlx::query_as::<_, UserRow>(&sql)
                    .bind(user.role.as_str())
                    .bind(&user.username)
                    .bind(&user.email)
                    .bind(&user.phone_number)
                    .bind(&user.password_hash)
                    .bind(&user.name)
                    .bind(&user.surname)
                    .bind(user.date_of_birth)
                    .bind(&user.address)
                    .bind(&user.about_me)
                    .bind(&user.picture_url)
                    .bind(user.activated)
                    .bind(user.id)
                    .bind(user.version)
                    .fetch_optional(&self.pool),
            )
            .await
            .map_err(email_conflict)?;
        row.ok_or(StoreError::EditConflict)?.try_into()
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        let result = self
            .timed(
                sqlx::query("DELETE FROM users WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    async fn activation_link(&self, code: &str) -> Result<ActivationLink> {
        self.timed(
            sqlx::query_as::<_, ActivationLink>(
                "SELECT link, activated, user_id, creation_date FROM activation_links WHERE link = $1",
            )
            .bind(code)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("activation link"))
    }

    async fn activate(&self, code: &str) -> Result<User> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;

            let link = sqlx::query_as::<_, ActivationLink>(
                "SELECT link, activated, user_id, creation_date FROM activation_links \
                 WHERE link = $1 FOR UPDATE",
            )
            .bind(code)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("activation link"))?;
            if link.activated {
                return Err(StoreError::AlreadyActivated);
            }

            sqlx::query("UPDATE activation_links SET activated = true WHERE link = $1")
                .bind(code)
                .execute(&mut *tx)
                .await?;
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "UPDATE users SET activated = true, version = version + 1 WHERE id = $1 \
                 RETURNING {USER_COLUMNS}"
            ))
            .bind(link.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("user"))?;

            tx.commit().await?;
            User::try_from(row)
        })
        .await
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn find_token_by_user(&self, user_id: i64) -> Result<TokenRecord> {
        self.timed(
            sqlx::query_as::<_, TokenRecord>(
                "SELECT id, user_id, refresh_token FROM tokens WHERE user_id = $1",
            )
            .bind(user_id)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("refresh token"))
    }

    async fn find_token_by_digest(&self, digest: &str) -> Result<TokenRecord> {
        self.timed(
            sqlx::query_as::<_, TokenRecord>(
                "SELECT id, user_id, refresh_token FROM tokens WHERE refresh_token = $1",
            )
            .bind(digest)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("refresh token"))
    }

    async fn insert_token(&self, user_id: i64, digest: &str) -> Result<TokenRecord> {
        // The upsert keeps one row per user even when two saves race.
        self.timed(
            sqlx::query_as::<_, TokenRecord>(
                "INSERT INTO tokens (user_id, refresh_token) VALUES ($1, $2) \
                 ON CONFLICT (user_id) DO UPDATE SET refresh_token = EXCLUDED.refresh_token \
                 RETURNING id, user_id, refresh_token",
            )
            .bind(user_id)
            .bind(digest)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn rotate_token(
        &self,
        user_id: i64,
        old_digest: &str,
        new_digest: &str,
    ) -> Result<TokenRecord> {
        // Conditional on the old digest: of two racing rotations only one
        // matches the row.
        self.timed(
            sqlx::query_as::<_, TokenRecord>(
                "UPDATE tokens SET refresh_token = $3 \
                 WHERE user_id = $1 AND refresh_token = $2 \
                 RETURNING id, user_id, refresh_token",
            )
            .bind(user_id)
            .bind(old_digest)
            .bind(new_digest)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("refresh token"))
    }

    async fn delete_token_by_digest(&self, digest: &str) -> Result<u64> {
        let result = self
            .timed(
                sqlx::query("DELETE FROM tokens WHERE refresh_token = $1")
                    .bind(digest)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn insert_product(&self, new: &NewProduct) -> Result<Product> {
        self.timed(
            sqlx::query_as::<_, Product>(&format!(
                "INSERT INTO products (name, price, description, category, quantity, is_available) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING {PRODUCT_COLUMNS}"
            ))
            .bind(&new.name)
            .bind(new.price)
            .bind(&new.description)
            .bind(&new.category)
            .bind(new.quantity)
            .bind(new.is_available())
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn product(&self, id: i64) -> Result<Product> {
        self.timed(
            sqlx::query_as::<_, Product>(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("product"))
    }

    async fn list_products(
        &self,
        name: &str,
        category: &str,
        filters: &Filters,
    ) -> Result<(Vec<Product>, Metadata)> {
        let sql = format!(
            "SELECT count(*) OVER() AS total_records, {PRODUCT_COLUMNS} FROM products \
             WHERE (to_tsvector('simple', name) @@ plainto_tsquery('simple', $1) OR $1 = '') \
             AND (to_tsvector('simple', category) @@ plainto_tsquery('simple', $2) OR $2 = '') \
             ORDER BY {} {}, id ASC \
             LIMIT $3 OFFSET $4",
            filters.sort_column(),
            filters.sort_direction(),
        );
        let rows = self
            .timed(
                sqlx::query_as::<_, ProductPageRow>(&sql)
                    .bind(name)
                    .bind(category)
                    .bind(filters.limit())
                    .bind(filters.offset())
                    .fetch_all(&self.pool),
            )
            .await?;

        let metadata = page_metadata(rows.first().map(|r| r.total_records), filters);
        Ok((rows.into_iter().map(|r| r.product).collect(), metadata))
    }

    async fn update_product(&self, product: &Product) -> Result<Product> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;

            let (old_price, version) = sqlx::query_as::<_, (i64, i32)>(
                "SELECT price, version FROM products WHERE id = $1 FOR UPDATE",
            )
            .bind(product.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::EditConflict)?;
            if version != product.version {
                return Err(StoreError::EditConflict);
            }

            if product.price != old_price {
                let price_delta = product.price.checked_sub(old_price).ok_or_else(overflow)?;
                let repriced = sqlx::query(
                    "UPDATE shopping_sessions s SET total = s.total + agg.delta \
                     FROM (SELECT session_id, SUM(quantity)::BIGINT * $2 AS delta \
                           FROM cart_items WHERE product_id = $1 GROUP BY session_id) agg \
                     WHERE s.id = agg.session_id",
                )
                .bind(product.id)
                .bind(price_delta)
                .execute(&mut *tx)
                .await?;
                debug!(
                    product_id = product.id,
                    sessions = repriced.rows_affected(),
                    "repriced carts"
                );
            }

            let updated = sqlx::query_as::<_, Product>(&format!(
                "UPDATE products SET name = $2, price = $3, description = $4, category = $5, \
                 quantity = $6, is_available = $7, version = version + 1 \
                 WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
            ))
            .bind(product.id)
            .bind(&product.name)
            .bind(product.price)
            .bind(&product.description)
            .bind(&product.category)
            .bind(product.quantity)
            .bind(product.quantity > 0)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, StoreError>(updated)
        })
        .await
    }

    async fn delete_product(&self, id: i64) -> Result<()> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;

            let price =
                sqlx::query_scalar::<_, i64>("SELECT price FROM products WHERE id = $1 FOR UPDATE")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or(StoreError::NotFound("product"))?;

            sqlx::query(
                "UPDATE shopping_sessions s SET total = s.total - agg.amount \
                 FROM (SELECT session_id, SUM(quantity)::BIGINT * $2 AS amount \
                       FROM cart_items WHERE product_id = $1 GROUP BY session_id) agg \
                 WHERE s.id = agg.session_id",
            )
            .bind(id)
            .bind(price)
            .execute(&mut *tx)
            .await?;

            // Items and comments go with the product via ON DELETE CASCADE.
            sqlx::query("DELETE FROM products WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<_, StoreError>(())
        })
        .await
    }
}

#[async_trait]
impl CommentStore for PgStore {
    async fn insert_comment(&self, new: &NewComment) -> Result<Comment> {
        let result = self
            .timed(
                sqlx::query_as::<_, Comment>(&format!(
                    "INSERT INTO comments (product_id, owner_id, text) VALUES ($1, $2, $3) \
                     RETURNING {COMMENT_COLUMNS}"
                ))
                .bind(new.product_id)
                .bind(new.owner_id)
                .bind(&new.text)
                .fetch_one(&self.pool),
            )
            .await;
        match result {
            Err(StoreError::Database(sqlx::Error::Database(ref db)))
                if db.is_foreign_key_violation() =>
            {
                Err(StoreError::NotFound("product"))
            }
            other => other,
        }
    }

    async fn comment(&self, id: i64) -> Result<Comment> {
        self.timed(
            sqlx::query_as::<_, Comment>(&format!(
                "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("comment"))
    }

    async fn list_comments(
        &self,
        product_id: i64,
        filters: &Filters,
    ) -> Result<(Vec<Comment>, Metadata)> {
        let sql = format!(
            "SELECT count(*) OVER() AS total_records, {COMMENT_COLUMNS} FROM comments \
             WHERE product_id = $1 \
             ORDER BY {} {}, id ASC \
             LIMIT $2 OFFSET $3",
            filters.sort_column(),
            filters.sort_direction(),
        );
        let rows = self
            .timed(
                sqlx::query_as::<_, CommentPageRow>(&sql)
                    .bind(product_id)
                    .bind(filters.limit())
                    .bind(filters.offset())
                    .fetch_all(&self.pool),
            )
            .await?;

        let metadata = page_metadata(rows.first().map(|r| r.total_records), filters);
        Ok((rows.into_iter().map(|r| r.comment).collect(), metadata))
    }

    async fn update_comment(&self, comment: &Comment) -> Result<Comment> {
        self.timed(
            sqlx::query_as::<_, Comment>(&format!(
                "UPDATE comments SET text = $3, version = version + 1 \
                 WHERE id = $1 AND version = $2 RETURNING {COMMENT_COLUMNS}"
            ))
            .bind(comment.id)
            .bind(comment.version)
            .bind(&comment.text)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::EditConflict)
    }

    async fn delete_comment(&self, id: i64) -> Result<()> {
        let result = self
            .timed(
                sqlx::query("DELETE FROM comments WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("comment"));
        }
        Ok(())
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn session(&self, id: i64) -> Result<ShoppingSession> {
        self.timed(
            sqlx::query_as::<_, ShoppingSession>(&format!(
                "SELECT {SESSION_COLUMNS} FROM shopping_sessions WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("shopping session"))
    }

    async fn session_by_user(&self, user_id: i64) -> Result<ShoppingSession> {
        self.timed(
            sqlx::query_as::<_, ShoppingSession>(&format!(
                "SELECT {SESSION_COLUMNS} FROM shopping_sessions WHERE user_id = $1"
            ))
            .bind(user_id)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("shopping session"))
    }

    async fn cart_items(&self, session_id: i64) -> Result<Vec<CartItem>> {
        self.timed(
            sqlx::query_as::<_, CartItem>(&format!(
                "SELECT {ITEM_COLUMNS} FROM cart_items WHERE session_id = $1 ORDER BY id"
            ))
            .bind(session_id)
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn cart_item(&self, id: i64) -> Result<CartItem> {
        self.timed(
            sqlx::query_as::<_, CartItem>(&format!(
                "SELECT {ITEM_COLUMNS} FROM cart_items WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("cart item"))
    }

    async fn cart_lines(&self, session_id: i64) -> Result<Vec<CartLine>> {
        self.timed(
            sqlx::query_as::<_, CartLine>(
                "SELECT ci.id AS item_id, p.id AS product_id, p.name AS product_name, \
                 p.price AS unit_price, ci.quantity \
                 FROM cart_items ci JOIN products p ON p.id = ci.product_id \
                 WHERE ci.session_id = $1 ORDER BY ci.id",
            )
            .bind(session_id)
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn cart_total(&self, session_id: i64) -> Result<i64> {
        self.timed(
            sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(SUM(ci.quantity * p.price), 0)::BIGINT \
                 FROM shopping_sessions s \
                 LEFT JOIN cart_items ci ON ci.session_id = s.id \
                 LEFT JOIN products p ON p.id = ci.product_id \
                 WHERE s.id = $1 GROUP BY s.id",
            )
            .bind(session_id)
            .fetch_optional(&self.pool),
        )
        .await?
        .ok_or(StoreError::NotFound("shopping session"))
    }

    async fn add_cart_item(
        &self,
        session_id: i64,
        product_id: i64,
        quantity: i64,
    ) -> Result<CartMutation> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;
            lock_product_price(&mut tx, product_id).await?;
            lock_session(&mut tx, session_id).await?;

            let item = sqlx::query_as::<_, CartItem>(&format!(
                "INSERT INTO cart_items (session_id, product_id, quantity) VALUES ($1, $2, $3) \
                 RETURNING {ITEM_COLUMNS}"
            ))
            .bind(session_id)
            .bind(product_id)
            .bind(quantity)
            .fetch_one(&mut *tx)
            .await?;

            let total = sqlx::query_scalar::<_, i64>(
                "UPDATE shopping_sessions SET total = ( \
                     SELECT COALESCE(SUM(ci.quantity * p.price), 0)::BIGINT \
                     FROM cart_items ci JOIN products p ON p.id = ci.product_id \
                     WHERE ci.session_id = $1) \
                 WHERE id = $1 RETURNING total",
            )
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, StoreError>(CartMutation { item, total })
        })
        .await
    }

    async fn set_cart_item_quantity(&self, item_id: i64, quantity: i64) -> Result<CartMutation> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;
            let (item, price) = lock_item(&mut tx, item_id).await?;
            let delta = line_delta(item.quantity, quantity, price).ok_or_else(overflow)?;

            let item = sqlx::query_as::<_, CartItem>(&format!(
                "UPDATE cart_items SET quantity = $2 WHERE id = $1 RETURNING {ITEM_COLUMNS}"
            ))
            .bind(item_id)
            .bind(quantity)
            .fetch_one(&mut *tx)
            .await?;
            let total = apply_delta(&mut tx, item.session_id, delta).await?;

            tx.commit().await?;
            Ok::<_, StoreError>(CartMutation { item, total })
        })
        .await
    }

    async fn remove_cart_item(&self, item_id: i64) -> Result<CartMutation> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;
            let (item, price) = lock_item(&mut tx, item_id).await?;
            let line = item.quantity.checked_mul(price).ok_or_else(overflow)?;

            sqlx::query("DELETE FROM cart_items WHERE id = $1")
                .bind(item_id)
                .execute(&mut *tx)
                .await?;
            let total = apply_delta(&mut tx, item.session_id, -line).await?;

            tx.commit().await?;
            Ok::<_, StoreError>(CartMutation { item, total })
        })
        .await
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        self.timed(sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }
}
