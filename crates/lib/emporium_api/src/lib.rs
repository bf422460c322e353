//! # emporium_api
//!
//! HTTP API library for Emporium.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use sqlx::PgPool;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use emporium_core::auth::AuthError;
use emporium_core::auth::jwt::TokenIssuer;
use emporium_core::auth::password;
use emporium_core::auth::registry::TokenRegistry;
use emporium_core::cart::CartService;
use emporium_core::mailer::Mailer;
use emporium_core::store::Store;

use crate::config::ApiConfig;
use crate::handlers::{auth, cart, comments, health, products, users};
use crate::middleware::auth::{require_admin, require_admin_or_owner, require_auth};

const DECOY_PASSWORD: &str = "emporium-no-such-account";

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tokens: Arc<TokenIssuer>,
    pub mailer: Arc<dyn Mailer>,
    /// Background work (mail delivery) that shutdown waits for.
    pub tasks: TaskTracker,
    pub config: ApiConfig,
    /// Hash checked when a login names no account, at the configured cost.
    pub decoy_hash: Arc<str>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        config: ApiConfig,
    ) -> Result<Self, AuthError> {
        let decoy_hash = password::hash_password(DECOY_PASSWORD, config.password_cost)?;
        Ok(Self {
            store,
            tokens: Arc::new(TokenIssuer::new(&config.jwt)?),
            mailer,
            tasks: TaskTracker::new(),
            config,
            decoy_hash: decoy_hash.into(),
        })
    }

    pub fn registry(&self) -> TokenRegistry {
        TokenRegistry::new(self.store.clone())
    }

    pub fn carts(&self) -> CartService {
        CartService::new(self.store.clone())
    }
}

/// Run embedded database migrations.
///
/// Delegates to `emporium_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    emporium_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let auth_layer = axum::middleware::from_fn_with_state(state.clone(), require_auth);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/healthcheck", get(health::healthcheck_handler))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/activate/{code}", get(auth::activate_handler))
        .route("/auth/authenticate", post(auth::authenticate_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/products", get(products::list_products_handler))
        .route("/products/{id}", get(products::show_product_handler))
        .route(
            "/products/{id}/comments",
            get(comments::list_comments_handler),
        );

    // Any authenticated user
    let authenticated = Router::new()
        .route(
            "/products/{id}/comments",
            post(comments::create_comment_handler),
        )
        .route(
            "/comments/{id}",
            patch(comments::update_comment_handler).delete(comments::delete_comment_handler),
        )
        .route("/cart", get(cart::show_cart_handler))
        .route("/cart/receipt", get(cart::receipt_handler))
        .route("/cart/items", post(cart::add_item_handler))
        .route(
            "/cart/items/{id}",
            get(cart::show_item_handler)
                .patch(cart::update_item_handler)
                .delete(cart::remove_item_handler),
        )
        .route_layer(auth_layer.clone());

    let owner_or_admin = Router::new()
        .route(
            "/users/{id}",
            get(users::show_user_handler).patch(users::update_user_handler),
        )
        .route_layer(axum::middleware::from_fn(require_admin_or_owner))
        .route_layer(auth_layer.clone());

    let admin = Router::new()
        .route("/products", post(products::create_product_handler))
        .route(
            "/products/{id}",
            patch(products::update_product_handler).delete(products::delete_product_handler),
        )
        .route("/users/{id}", axum::routing::delete(users::delete_user_handler))
        .route("/users/{id}/role", put(users::update_role_handler))
        .route_layer(axum::middleware::from_fn(require_admin))
        .route_layer(auth_layer);

    let v1 = Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(owner_or_admin)
        .merge(admin);

    Router::new()
        .nest("/v1", v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
