//! Application error types.
//!
//! Every failure leaves the API as one JSON body:
//! `{"error": <code>, "message": <text>, "fields"?: {...}, "reason"?: <code>}`.

use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use emporium_core::auth::AuthError;
use emporium_core::cart::CartError;
use emporium_core::store::StoreError;
use emporium_core::validation::Validator;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Why a request was rejected with 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No credentials were presented.
    MissingCredentials,
    /// Email/password pair did not match an account.
    InvalidCredentials,
    /// Token is malformed, has a bad signature or is no longer live.
    InvalidToken,
    ExpiredToken,
    /// Token is valid but its user no longer exists.
    UnknownUser,
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::MissingCredentials => "missing_credentials",
            AuthFailure::InvalidCredentials => "invalid_credentials",
            AuthFailure::InvalidToken => "invalid_token",
            AuthFailure::ExpiredToken => "expired_token",
            AuthFailure::UnknownUser => "unknown_user",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthFailure::MissingCredentials => "you must be authenticated to access this resource",
            AuthFailure::InvalidCredentials => "invalid authentication credentials",
            AuthFailure::InvalidToken => "invalid or missing authentication token",
            AuthFailure::ExpiredToken => "authentication token has expired",
            AuthFailure::UnknownUser => "the account for this token no longer exists",
        }
    }
}

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed")]
    Validation(BTreeMap<String, String>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {}", .0.code())]
    Unauthorized(AuthFailure),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn not_found() -> Self {
        AppError::NotFound("the requested resource could not be found".into())
    }

    pub fn not_permitted() -> Self {
        AppError::Forbidden("your user account doesn't have the necessary permissions to access this resource".into())
    }

    /// A single-field validation failure.
    pub fn invalid(field: &str, message: &str) -> Self {
        AppError::Validation(BTreeMap::from([(field.to_string(), message.to_string())]))
    }
}

/// Turn a failed validator into an error; a clean one passes.
pub fn ensure_valid(v: Validator) -> AppResult<()> {
    if v.valid() {
        Ok(())
    } else {
        Err(AppError::Validation(v.into_errors()))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut fields = None;
        let mut reason = None;
        let (status, error, message) = match &self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.as_str()),
            AppError::Validation(f) => {
                fields = Some(f);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "validation_error",
                    "the request failed validation",
                )
            }
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Unauthorized(failure) => {
                reason = Some(failure.code());
                (StatusCode::UNAUTHORIZED, "unauthorized", failure.message())
            }
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::Internal(detail) => {
                error!(error = %detail, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "the server encountered a problem and could not process your request",
                )
            }
        };
        let body = Json(ErrorBody {
            error,
            message,
            fields,
            reason,
        });
        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => AppError::not_found(),
            StoreError::DuplicateEmail | StoreError::EditConflict | StoreError::AlreadyActivated => {
                AppError::Conflict(e.to_string())
            }
            StoreError::Timeout(_) | StoreError::Database(_) | StoreError::Internal(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidToken(_) => AppError::Unauthorized(AuthFailure::InvalidToken),
            AuthError::ExpiredToken => AppError::Unauthorized(AuthFailure::ExpiredToken),
            AuthError::SigningError(msg) | AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<CartError> for AppError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::InvalidQuantity => AppError::invalid("quantity", "must be greater than zero"),
            CartError::Store(e) => AppError::from(e),
        }
    }
}
