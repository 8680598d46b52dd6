//! Account plan routes.
//!
//! GET /accounts/{id}/plans - Plan list with live quota, expiry and usage

use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use tracing::error;
use uuid::Uuid;

use super::status_for;
use crate::fulfillment::OrderFulfillmentService;
use crate::models::{ApiResponse, PlanUsage};

/// Build the accounts router.
pub fn router() -> Router {
    Router::new().route("/accounts/{id}/plans", get(get_account_plans))
}

async fn get_account_plans(
    Extension(service): Extension<Arc<OrderFulfillmentService>>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<PlanUsage>>>, StatusCode> {
    let plans = service.account_usage(account_id).await.map_err(|e| {
        error!(account_id = %account_id, "Failed to load account plans: {}", e);
        status_for(&e)
    })?;

    let message = format!("{} plan(s)", plans.len());
    Ok(Json(ApiResponse {
        data: plans,
        message,
    }))
}
