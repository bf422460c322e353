//! Product comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub product_id: i64,
    pub owner_id: i64,
    pub text: String,
    pub creation_date: DateTime<Utc>,
    #[serde(skip)]
    pub version: i32,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub product_id: i64,
    pub owner_id: i64,
    pub text: String,
}
