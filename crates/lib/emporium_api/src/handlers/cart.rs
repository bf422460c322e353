//! Cart handlers. Every route acts on the caller's own shopping session.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::{Value, json};

use emporium_core::cart::CartUpdate;
use emporium_core::models::{CartItem, CartMutation};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::{ApiJson, IdPath};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{AddCartItemRequest, UpdateCartItemRequest};

/// An item of the caller's cart. Items of other sessions are reported missing.
async fn own_item(state: &AppState, auth: &AuthenticatedUser, item_id: i64) -> AppResult<CartItem> {
    let carts = state.carts();
    let session = carts.session_for_user(auth.user.id).await?;
    let item = carts.get_item(item_id).await?;
    if item.session_id != session.id {
        return Err(AppError::not_found());
    }
    Ok(item)
}

fn mutation_body(mutation: &CartMutation) -> Value {
    json!({ "cart_item": mutation.item, "total": mutation.total })
}

/// `GET /v1/cart`
pub async fn show_cart_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> AppResult<Json<Value>> {
    let cart = state.carts().cart_for_user(auth.user.id).await?;
    Ok(Json(json!({
        "shopping_session": cart.session,
        "cart_items": cart.items,
    })))
}

/// `POST /v1/cart/items`
pub async fn add_item_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    ApiJson(body): ApiJson<AddCartItemRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let carts = state.carts();
    let session = carts.session_for_user(auth.user.id).await?;
    let mutation = carts
        .add_item(session.id, body.product_id, body.quantity)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(mutation_body(&mutation))))
}

/// `GET /v1/cart/items/{id}`
pub async fn show_item_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    IdPath(id): IdPath,
) -> AppResult<Json<Value>> {
    let item = own_item(&state, &auth, id).await?;
    Ok(Json(json!({ "cart_item": item })))
}

/// `PATCH /v1/cart/items/{id}`: quantity 0 removes the item.
pub async fn update_item_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    IdPath(id): IdPath,
    ApiJson(body): ApiJson<UpdateCartItemRequest>,
) -> AppResult<Json<Value>> {
    own_item(&state, &auth, id).await?;
    let update = state.carts().update_quantity(id, body.quantity).await?;
    let mut body = mutation_body(update.mutation());
    body["removed"] = json!(matches!(update, CartUpdate::Removed(_)));
    Ok(Json(body))
}

/// `DELETE /v1/cart/items/{id}`
pub async fn remove_item_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    IdPath(id): IdPath,
) -> AppResult<Json<Value>> {
    own_item(&state, &auth, id).await?;
    let mutation = state.carts().remove_item(id).await?;
    Ok(Json(json!({
        "message": "cart item successfully deleted",
        "total": mutation.total,
    })))
}

/// `GET /v1/cart/receipt`: plain-text attachment.
pub async fn receipt_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> AppResult<impl IntoResponse> {
    let receipt = state.carts().receipt_for(&auth.user).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"receipt.txt\""),
        ],
        receipt,
    ))
}
