//! Fulfillment-level error taxonomy.
//!
//! Panel and storage errors are converted at the service boundary so callers
//! only match on one enum. Configuration and ambiguity errors carry a message
//! meant for the operator who has to fix them.

use thiserror::Error;
use uuid::Uuid;

use crate::models::OrderStatus;
use crate::panel::PanelError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("panel authentication failed: {0}")]
    Authentication(String),

    #[error("panel unavailable: {0}")]
    PanelUnavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("username '{0}' already exists on the panel")]
    DuplicateUsername(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "cannot determine which package '{username}' belongs to; \
         use the plan change flow and pick a package explicitly"
    )]
    AmbiguousRenewal { username: String },

    #[error("order {order_id} is {status} and cannot be changed")]
    InvalidTransition { order_id: Uuid, status: OrderStatus },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type FulfillmentResult<T> = Result<T, FulfillmentError>;

impl From<PanelError> for FulfillmentError {
    fn from(err: PanelError) -> Self {
        match err {
            PanelError::Authentication(msg) => FulfillmentError::Authentication(msg),
            PanelError::DuplicateUsername(name) => FulfillmentError::DuplicateUsername(name),
            PanelError::NotFound(what) => FulfillmentError::NotFound(what),
            PanelError::Unauthorized => {
                FulfillmentError::PanelUnavailable("session rejected by panel".to_string())
            }
            PanelError::Unavailable(msg) | PanelError::Rejected(msg) => {
                FulfillmentError::PanelUnavailable(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_errors_map_onto_taxonomy() {
        let err: FulfillmentError = PanelError::DuplicateUsername("alice".into()).into();
        assert!(matches!(err, FulfillmentError::DuplicateUsername(ref n) if n == "alice"));

        let err: FulfillmentError = PanelError::Unauthorized.into();
        assert!(matches!(err, FulfillmentError::PanelUnavailable(_)));

        let err: FulfillmentError = PanelError::Rejected("inbound missing".into()).into();
        assert_eq!(err.to_string(), "panel unavailable: inbound missing");
    }

    #[test]
    fn ambiguous_renewal_message_is_actionable() {
        let err = FulfillmentError::AmbiguousRenewal { username: "bob".into() };
        assert!(err.to_string().contains("plan change flow"));
    }
}
