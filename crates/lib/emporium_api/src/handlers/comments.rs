//! Product comment handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde_json::{Value, json};

use emporium_core::models::filters::COMMENT_SORT_SAFELIST;
use emporium_core::models::{Comment, NewComment};
use emporium_core::validation::{Validator, validate_comment};

use crate::AppState;
use crate::error::{AppError, AppResult, ensure_valid};
use crate::extract::{ApiJson, ApiQuery, IdPath};
use crate::handlers::list_filters;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{CommentRequest, ListQuery};

/// `GET /v1/products/{id}/comments`
pub async fn list_comments_handler(
    State(state): State<AppState>,
    IdPath(product_id): IdPath,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> AppResult<Json<Value>> {
    let filters = list_filters(&query, COMMENT_SORT_SAFELIST)?;
    // 404 for an unknown product rather than an empty page.
    state.store.product(product_id).await?;
    let (comments, metadata) = state.store.list_comments(product_id, &filters).await?;
    Ok(Json(json!({ "comments": comments, "metadata": metadata })))
}

/// `POST /v1/products/{id}/comments`: authored by the caller.
pub async fn create_comment_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    IdPath(product_id): IdPath,
    ApiJson(body): ApiJson<CommentRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let mut v = Validator::new();
    validate_comment(&mut v, &body.text);
    ensure_valid(v)?;

    let comment = state
        .store
        .insert_comment(&NewComment {
            product_id,
            owner_id: auth.user.id,
            text: body.text,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "comment": comment }))))
}

/// Load a comment the caller may change: its author or an admin.
async fn editable_comment(
    state: &AppState,
    auth: &AuthenticatedUser,
    id: i64,
) -> AppResult<Comment> {
    let comment = state.store.comment(id).await?;
    if comment.owner_id != auth.user.id && !auth.is_admin() {
        return Err(AppError::not_permitted());
    }
    Ok(comment)
}

/// `PATCH /v1/comments/{id}`
pub async fn update_comment_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    IdPath(id): IdPath,
    ApiJson(body): ApiJson<CommentRequest>,
) -> AppResult<Json<Value>> {
    let mut comment = editable_comment(&state, &auth, id).await?;

    let mut v = Validator::new();
    validate_comment(&mut v, &body.text);
    ensure_valid(v)?;

    comment.text = body.text;
    let comment = state.store.update_comment(&comment).await?;
    Ok(Json(json!({ "comment": comment })))
}

/// `DELETE /v1/comments/{id}`
pub async fn delete_comment_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    IdPath(id): IdPath,
) -> AppResult<Json<Value>> {
    let comment = editable_comment(&state, &auth, id).await?;
    state.store.delete_comment(comment.id).await?;
    Ok(Json(json!({ "message": "comment successfully deleted" })))
}
