//! Persisted refresh tokens.

/// Registry row: the live refresh token of one user.
///
/// `refresh_token` holds the SHA-256 digest of the token, never the token itself.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub refresh_token: String,
}
