//! Catalog handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::{Value, json};
use tracing::info;

use emporium_core::models::NewProduct;
use emporium_core::models::filters::PRODUCT_SORT_SAFELIST;
use emporium_core::validation::{Validator, validate_product};

use crate::AppState;
use crate::error::{AppResult, ensure_valid};
use crate::extract::{ApiJson, ApiQuery, IdPath};
use crate::handlers::list_filters;
use crate::models::{CreateProductRequest, ListQuery, UpdateProductRequest};

/// `POST /v1/products`: admin only.
pub async fn create_product_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateProductRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let mut v = Validator::new();
    validate_product(
        &mut v,
        &body.name,
        body.price,
        &body.description,
        &body.category,
        body.quantity,
    );
    ensure_valid(v)?;

    let product = state
        .store
        .insert_product(&NewProduct {
            name: body.name,
            price: body.price,
            description: body.description,
            category: body.category,
            quantity: body.quantity,
        })
        .await?;
    info!(product_id = product.id, "product created");
    Ok((StatusCode::ACCEPTED, Json(json!({ "product": product }))))
}

/// `GET /v1/products?name=&category=&page=&page_size=&sort=`
pub async fn list_products_handler(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> AppResult<Json<Value>> {
    let filters = list_filters(&query, PRODUCT_SORT_SAFELIST)?;
    let (products, metadata) = state
        .store
        .list_products(
            query.name.as_deref().unwrap_or_default(),
            query.category.as_deref().unwrap_or_default(),
            &filters,
        )
        .await?;
    Ok(Json(json!({ "products": products, "metadata": metadata })))
}

/// `GET /v1/products/{id}`
pub async fn show_product_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> AppResult<Json<Value>> {
    let product = state.store.product(id).await?;
    Ok(Json(json!({ "product": product })))
}

/// `PATCH /v1/products/{id}`: admin only. A price change re-prices open carts.
pub async fn update_product_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
    ApiJson(body): ApiJson<UpdateProductRequest>,
) -> AppResult<Json<Value>> {
    let mut product = state.store.product(id).await?;
    if let Some(name) = body.name {
        product.name = name;
    }
    if let Some(price) = body.price {
        product.price = price;
    }
    if let Some(description) = body.description {
        product.description = description;
    }
    if let Some(category) = body.category {
        product.category = category;
    }
    if let Some(quantity) = body.quantity {
        product.set_quantity(quantity);
    }

    let mut v = Validator::new();
    validate_product(
        &mut v,
        &product.name,
        product.price,
        &product.description,
        &product.category,
        product.quantity,
    );
    ensure_valid(v)?;

    let product = state.store.update_product(&product).await?;
    info!(product_id = product.id, version = product.version, "product updated");
    Ok(Json(json!({ "product": product })))
}

/// `DELETE /v1/products/{id}`: admin only.
pub async fn delete_product_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> AppResult<Json<Value>> {
    state.store.delete_product(id).await?;
    info!(product_id = id, "product deleted");
    Ok(Json(json!({ "message": "product successfully deleted" })))
}
