//! Session middleware: bearer extraction, access-token verification, user
//! resolution and role gates.
//!
//! Every rejection returns before the next layer runs.

use axum::extract::{RawPathParams, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use emporium_core::auth::jwt::AccessClaims;
use emporium_core::models::{Role, User};
use emporium_core::store::StoreError;

use crate::AppState;
use crate::error::{AppError, AuthFailure};
use crate::extract::parse_id;

/// Inserted into request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: AccessClaims,
    pub user: User,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
fn bearer_token(request: &Request) -> Result<&str, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AppError::Unauthorized(AuthFailure::MissingCredentials))?;
    let value = header
        .to_str()
        .map_err(|_| AppError::Unauthorized(AuthFailure::InvalidToken))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthorized(AuthFailure::InvalidToken))
}

/// Axum middleware: verifies the bearer access token, loads its user and
/// injects [`AuthenticatedUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = state.tokens.verify_access(bearer_token(&request)?)?;

    let user = match state.store.user_by_id(claims.user_id).await {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => {
            debug!(user_id = claims.user_id, "token for unknown user");
            return Err(AppError::Unauthorized(AuthFailure::UnknownUser));
        }
        Err(e) => return Err(e.into()),
    };

    request
        .extensions_mut()
        .insert(AuthenticatedUser { claims, user });
    Ok(next.run(request).await)
}

/// Whether `auth` holds one of `allowed`. `Owner` admits the user whose id is
/// the route's `{id}`.
pub fn has_role(auth: &AuthenticatedUser, allowed: &[Role], path_id: Option<i64>) -> bool {
    allowed.iter().any(|role| match role {
        Role::Owner => path_id == Some(auth.user.id),
        stored => *stored == auth.user.role,
    })
}

fn authenticated(request: &Request) -> Result<&AuthenticatedUser, AppError> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(AppError::Unauthorized(AuthFailure::MissingCredentials))
}

fn path_id(params: &RawPathParams) -> Option<i64> {
    params
        .iter()
        .find(|(key, _)| *key == "id")
        .and_then(|(_, value)| parse_id(value))
}

async fn gate(
    allowed: &[Role],
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth = authenticated(&request)?;
    if !has_role(auth, allowed, path_id(&params)) {
        debug!(user_id = auth.user.id, role = %auth.user.role, "not enough permission");
        return Err(AppError::not_permitted());
    }
    Ok(next.run(request).await)
}

/// Role gate: admins only. Layer inside [`require_auth`].
pub async fn require_admin(
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    gate(&[Role::Admin], params, request, next).await
}

/// Role gate: admins, or the user named by the `{id}` path parameter.
pub async fn require_admin_or_owner(
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    gate(&[Role::Admin, Role::Owner], params, request, next).await
}
