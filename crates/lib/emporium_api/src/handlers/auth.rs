//! Authentication request handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum_extra::extract::cookie::CookieJar;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::{AppError, AppResult, AuthFailure};
use crate::extract::ApiJson;
use crate::models::{LoginRequest, RefreshRequest, RegisterRequest, TokenResponse};
use crate::services::auth;
use crate::services::cookies::{clear_refresh_cookie, refresh_cookie, refresh_token_from};

/// `POST /v1/auth/register`: create an account; the activation code goes out by mail.
pub async fn register_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let user = auth::register(&state, body).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))))
}

/// `GET /v1/auth/activate/{code}`
pub async fn activate_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<Value>> {
    let user = auth::activate(&state, &code).await?;
    Ok(Json(json!({ "user": user })))
}

/// `POST /v1/auth/authenticate`: email + password for a token pair.
pub async fn authenticate_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(body): ApiJson<LoginRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let (pair, user) = auth::authenticate(&state, &body.email, &body.password).await?;
    let jar = jar.add(refresh_cookie(&pair.refresh_token, state.config.cookie_secure));
    Ok((
        jar,
        Json(TokenResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user,
        }),
    ))
}

/// Refresh token from the JSON body, falling back to the cookie.
fn presented_refresh_token(jar: &CookieJar, body: &Bytes) -> AppResult<String> {
    let from_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(body)
            .map_err(|e| AppError::BadRequest(format!("body contains badly-formed JSON: {e}")))?
            .refresh_token
            .filter(|t| !t.is_empty())
    };
    from_body
        .or_else(|| refresh_token_from(jar))
        .ok_or(AppError::Unauthorized(AuthFailure::MissingCredentials))
}

/// `POST /v1/auth/refresh`: rotate the refresh token.
pub async fn refresh_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let token = presented_refresh_token(&jar, &body)?;
    let (pair, user) = auth::refresh(&state, &token).await?;
    let jar = jar.add(refresh_cookie(&pair.refresh_token, state.config.cookie_secure));
    Ok((
        jar,
        Json(TokenResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user,
        }),
    ))
}

/// `POST /v1/auth/logout`: revoke the refresh token and clear its cookie.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<Value>)> {
    let token = presented_refresh_token(&jar, &body)?;
    auth::logout(&state, &token).await?;
    let jar = jar.add(clear_refresh_cookie(state.config.cookie_secure));
    Ok((jar, Json(json!({ "message": "successfully logged out" }))))
}
