//! Health check.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use tracing::warn;

use crate::AppState;

/// `GET /v1/healthcheck`: service status and database reachability.
pub async fn healthcheck_handler(State(state): State<AppState>) -> Json<Value> {
    let database = match state.store.ping().await {
        Ok(()) => "up",
        Err(e) => {
            warn!(error = %e, "database ping failed");
            "down"
        }
    };
    Json(json!({
        "status": "available",
        "environment": state.config.environment,
        "version": emporium_core::version(),
        "database": database,
    }))
}
