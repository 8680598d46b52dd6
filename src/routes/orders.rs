//! Admin order routes.
//!
//! GET  /orders/{id}         - Retrieve an order by ID
//! POST /orders/{id}/approve - Approve (or confirm an auto-approved) order
//! POST /orders/{id}/reject  - Reject an order, reversing provisioning if needed

use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::status_for;
use crate::error::{FulfillmentError, FulfillmentResult};
use crate::fulfillment::{ApprovalTrigger, FulfillmentOutcome, OrderFulfillmentService};
use crate::models::{ApiResponse, OrderResponse};

/// Build the orders router.
pub fn router() -> Router {
    Router::new()
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/approve", post(approve_order))
        .route("/orders/{id}/reject", post(reject_order))
}

/// Retrieve an order by ID.
async fn get_order(
    Extension(service): Extension<Arc<OrderFulfillmentService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, StatusCode> {
    let order = service.get_order(id).await.map_err(|e| {
        if !matches!(e, FulfillmentError::NotFound(_)) {
            error!("Failed to query order: {}", e);
        }
        status_for(&e)
    })?;

    Ok(Json(ApiResponse {
        data: order.into(),
        message: "Order retrieved".to_string(),
    }))
}

async fn approve_order(
    Extension(service): Extension<Arc<OrderFulfillmentService>>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<FulfillmentOutcome>>) {
    let result = service.try_approve(id, ApprovalTrigger::Manual).await;
    respond(id, "approve", result)
}

async fn reject_order(
    Extension(service): Extension<Arc<OrderFulfillmentService>>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<FulfillmentOutcome>>) {
    let result = service.try_reject(id).await;
    respond(id, "reject", result)
}

/// Failures still carry an outcome body so the admin UI can show the message.
fn respond(
    order_id: Uuid,
    action: &'static str,
    result: FulfillmentResult<FulfillmentOutcome>,
) -> (StatusCode, Json<ApiResponse<FulfillmentOutcome>>) {
    match result {
        Ok(outcome) => {
            info!(order_id = %order_id, action, no_op = outcome.no_op, "{}", outcome.message);
            let message = outcome.message.clone();
            (StatusCode::OK, Json(ApiResponse { data: outcome, message }))
        }
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!(order_id = %order_id, action, "Order action failed: {}", e);
            } else {
                warn!(order_id = %order_id, action, "Order action refused: {}", e);
            }
            let outcome = FulfillmentOutcome::failed(&e);
            let message = outcome.message.clone();
            (status, Json(ApiResponse { data: outcome, message }))
        }
    }
}
