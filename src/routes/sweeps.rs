//! Manual sweep triggers.
//!
//! POST /sweeps/auto-approval - Run the auto-approval sweep now
//! POST /sweeps/renewals      - Run the renewal-queue sweep now

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json, Router};
use tracing::error;

use crate::fulfillment::OrderFulfillmentService;
use crate::models::ApiResponse;
use crate::scheduler::SweepReport;

/// Build the sweeps router.
pub fn router() -> Router {
    Router::new()
        .route("/sweeps/auto-approval", post(run_auto_approval))
        .route("/sweeps/renewals", post(run_renewals))
}

async fn run_auto_approval(
    Extension(service): Extension<Arc<OrderFulfillmentService>>,
) -> Result<Json<ApiResponse<SweepReport>>, StatusCode> {
    let report = service.run_auto_approval_sweep().await.map_err(|e| {
        error!("Auto-approval sweep failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ApiResponse {
        data: report,
        message: "Auto-approval sweep complete".to_string(),
    }))
}

async fn run_renewals(
    Extension(service): Extension<Arc<OrderFulfillmentService>>,
) -> Result<Json<ApiResponse<SweepReport>>, StatusCode> {
    let report = service.run_renewal_sweep().await.map_err(|e| {
        error!("Renewal sweep failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ApiResponse {
        data: report,
        message: "Renewal sweep complete".to_string(),
    }))
}
