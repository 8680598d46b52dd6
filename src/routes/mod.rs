//! HTTP route modules for the fulfillment service.
//!
//! - `orders`: order lookup, approve and reject
//! - `sweeps`: on-demand auto-approval and renewal sweeps
//! - `accounts`: account plan lists joined with panel usage
//! - `health`: liveness probe

pub mod accounts;
pub mod health;
pub mod orders;
pub mod sweeps;

use axum::http::StatusCode;

use crate::error::FulfillmentError;

/// HTTP status for a failed fulfillment operation.
pub(crate) fn status_for(err: &FulfillmentError) -> StatusCode {
    match err {
        FulfillmentError::NotFound(_) => StatusCode::NOT_FOUND,
        FulfillmentError::InvalidTransition { .. } | FulfillmentError::DuplicateUsername(_) => {
            StatusCode::CONFLICT
        }
        FulfillmentError::Configuration(_) | FulfillmentError::AmbiguousRenewal { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        FulfillmentError::Authentication(_) | FulfillmentError::PanelUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        FulfillmentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
