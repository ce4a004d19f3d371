//! # HTTP Server Module
//!
//! The query gateway's HTTP surface.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `/api/:table` - Compile and run a query (GET or POST, body is the query)
//! - `/meta/:api` - Collection mapping resolved for the caller
//! - `/subscription/:table` - Grants that apply to the caller

pub mod config;
pub mod errors;
pub mod observability_routes;
pub mod query_routes;
pub mod response;
pub mod server;

pub use config::{HttpServerConfig, ListenError};
pub use errors::{ErrorResponse, RestError, RestResult};
pub use query_routes::{query_routes, GatewayState};
pub use server::HttpServer;
