//! GET /health - Liveness probe

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

/// Build the health router.
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": env!("CARGO_PKG_NAME") }))
}
