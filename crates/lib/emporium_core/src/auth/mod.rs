//! Authentication logic.
//!
//! Provides password hashing, access/refresh token issuance and verification,
//! and the server-side refresh-token registry.

pub mod jwt;
pub mod password;
pub mod registry;

use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    ExpiredToken,

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
