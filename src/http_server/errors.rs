//! # Gateway Errors
//!
//! Maps auth, compilation and store failures onto HTTP responses. Server
//! errors are logged in full and rendered to the client generically.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::query::QueryError;
use crate::store::StoreError;

/// Result type for gateway handlers
pub type RestResult<T> = Result<T, RestError>;

/// Message sent to clients in place of any server-side detail
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Gateway errors
#[derive(Debug, Clone, Error)]
pub enum RestError {
    // ==================
    // Client Errors (4xx)
    // ==================
    /// Request body is not JSON
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    // ==================
    // Auth Errors
    // ==================
    /// Authentication error
    #[error("{0}")]
    Auth(#[from] AuthError),

    // ==================
    // Query Errors
    // ==================
    /// Compilation failed or access was denied
    #[error("{0}")]
    Query(#[from] QueryError),

    // ==================
    // Server Errors (5xx)
    // ==================
    /// Executing the compiled pipeline failed
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl RestError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        let code = match self {
            RestError::InvalidBody(_) => 400,
            RestError::Auth(e) => e.status_code(),
            RestError::Query(e) => e.status_code(),
            RestError::Store(e) if e.is_client_error() => 400,
            RestError::Store(_) => 500,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Text safe to show the client
    pub fn client_message(&self) -> String {
        if self.status_code().is_server_error() {
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl From<&RestError> for ErrorResponse {
    fn from(err: &RestError) -> Self {
        Self {
            code: err.status_code().as_u16(),
            error: err.client_message(),
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = Json(ErrorResponse::from(&self));
        (status, body).into_response()
    }
}
