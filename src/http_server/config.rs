//! # Listener Settings
//!
//! Where the gateway binds and which browser origins may call it. The
//! fields sit at the top level of the service config file, so
//! `{"host": "127.0.0.1", "port": 9000}` is enough to move the listener.
//!
//! Settings are checked when the config is loaded; an origin that is not a
//! valid header value is an error, never silently dropped.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Port used when none is configured
pub const DEFAULT_PORT: u16 = 8080;

/// Host used when none is configured: every IPv4 interface
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Listener settings that cannot be turned into a socket or CORS policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenError {
    #[error("host is not an IP address: '{0}'")]
    Host(String),

    #[error("CORS origin is not a valid header value: '{0}'")]
    Origin(String),
}

/// Gateway listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// IP address to bind; `localhost` means the IPv4 loopback
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Browser origins allowed to call the gateway; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl HttpServerConfig {
    /// The socket address to bind.
    ///
    /// Bracketed IPv6 hosts (`[::1]`) are accepted as well as bare ones.
    pub fn bind_addr(&self) -> Result<SocketAddr, ListenError> {
        let host = self.host.trim();
        let ip = if host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            host.trim_start_matches('[')
                .trim_end_matches(']')
                .parse()
                .map_err(|_| ListenError::Host(self.host.clone()))?
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Whether any origin may call the gateway
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty()
    }

    /// Configured origins as header values, in configured order
    pub fn allowed_origins(&self) -> Result<Vec<HeaderValue>, ListenError> {
        self.cors_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin.trim())
                    .ok()
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| ListenError::Origin(origin.clone()))
            })
            .collect()
    }

    /// CORS policy for the gateway router. Any method and header is allowed;
    /// only the origin is restricted.
    pub fn cors_layer(&self) -> Result<CorsLayer, ListenError> {
        let origin = if self.allows_any_origin() {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(self.allowed_origins()?)
        };
        Ok(CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any))
    }

    pub fn validate(&self) -> Result<(), ListenError> {
        self.bind_addr()?;
        self.allowed_origins()?;
        Ok(())
    }
}
