//! # HTTP Server
//!
//! Combines the gateway and health routers behind CORS and request tracing.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::Request, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::config::{HttpServerConfig, ListenError};
use super::observability_routes::health_routes;
use super::query_routes::{query_routes, GatewayState};

/// HTTP server for the query gateway
pub struct HttpServer {
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    /// Create a server over the given gateway state
    pub fn new(config: HttpServerConfig, state: Arc<GatewayState>) -> Result<Self, ListenError> {
        let addr = config.bind_addr()?;
        let router = Self::build_router(&config, state)?;
        Ok(Self { addr, router })
    }

    /// Build the combined router with all endpoints
    fn build_router(config: &HttpServerConfig, state: Arc<GatewayState>) -> Result<Router, ListenError> {
        let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                request_id = %Uuid::new_v4(),
                method = %request.method(),
                uri = %request.uri(),
            )
        });

        Ok(Router::new()
            .merge(health_routes())
            .merge(query_routes(state))
            .layer(trace)
            .layer(config.cors_layer()?))
    }

    /// The address `start` binds
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until interrupted
    pub async fn start(self) -> io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "query gateway listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("query gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
