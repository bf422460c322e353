//! User accounts, roles and activation links.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Access role.
///
/// `Admin` and `User` are stored on accounts. `Owner` is relational: it is
/// never stored, and in an allowed-role set it admits the user whose id
/// matches the resource id of the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Owner => "owner",
        }
    }

    /// Whether the role may be persisted on an account.
    pub fn is_assignable(&self) -> bool {
        !matches!(self, Role::Owner)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub role: Role,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    #[serde(skip)]
    pub password_hash: String,
    pub registration_date: DateTime<Utc>,
    pub name: String,
    pub surname: String,
    pub date_of_birth: Option<NaiveDate>,
    pub address: String,
    pub about_me: String,
    pub picture_url: String,
    pub activated: bool,
    /// Optimistic-concurrency counter, bumped on every update.
    #[serde(skip)]
    pub version: i32,
}

/// Input for creating a user. The password is already hashed.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub password_hash: String,
    pub name: String,
    pub surname: String,
    pub date_of_birth: Option<NaiveDate>,
    pub address: String,
    pub about_me: String,
}

/// One-time code that activates an account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivationLink {
    pub link: String,
    pub activated: bool,
    pub user_id: i64,
    pub creation_date: DateTime<Utc>,
}

/// Everything created in one go when an account is registered.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub session: super::ShoppingSession,
    pub activation: ActivationLink,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_its_own_display() {
        for role in [Role::Admin, Role::User, Role::Owner] {
            assert_eq!(role.to_string().parse::<Role>(), Ok(role));
        }
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn owner_is_not_assignable() {
        assert!(Role::Admin.is_assignable());
        assert!(Role::User.is_assignable());
        assert!(!Role::Owner.is_assignable());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }
}
