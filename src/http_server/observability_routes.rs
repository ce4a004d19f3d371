//! Observability HTTP Routes
//!
//! Liveness check, reachable without a token.

use axum::{routing::get, Router};

/// Health check route
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_handler))
}

/// Health check handler
async fn health_handler() -> String {
    health_message()
}

fn health_message() -> String {
    format!("ok - version {}", env!("CARGO_PKG_VERSION"))
}
