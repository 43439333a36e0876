//! Status server
//!
//! This module provides the status page and REST API for the bridge
//! node.

pub mod rest;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;

/// Create the server router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Status page
        .route("/", get(rest::index))
        // Health check
        .route("/health", get(rest::health))
        // REST endpoints
        .route("/api/status", get(rest::get_status))
        // CORS for dashboards polling the status
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
