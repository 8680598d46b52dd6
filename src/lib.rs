//! # VPN Order Fulfillment
//!
//! Turns paid orders into VPN client credentials on a proxy panel.
//!
//! Exposes the Axum router and modules so integration tests can create
//! an in-process server backed by the in-memory store and panel.

pub mod config;
pub mod db;
pub mod error;
pub mod fulfillment;
pub mod link;
pub mod models;
pub mod notify;
pub mod panel;
pub mod routes;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::fulfillment::OrderFulfillmentService;

/// Build the Axum router with all route modules and middleware.
///
/// This function does NOT start a server or the background sweeps.
pub fn create_app(service: Arc<OrderFulfillmentService>) -> Router {
    Router::new()
        .merge(routes::orders::router())
        .merge(routes::sweeps::router())
        .merge(routes::accounts::router())
        .merge(routes::health::router())
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
