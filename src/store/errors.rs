//! # Store Errors
//!
//! Failures raised by a document store while finding or aggregating.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Document store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached or its state is unusable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A pipeline stage or match operator this store does not execute
    #[error("Unsupported by store: {0}")]
    Unsupported(String),

    /// A stage is structurally invalid (wrong argument shape)
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A stored administrative record cannot be decoded
    #[error("Invalid record in {collection}: {reason}")]
    InvalidRecord { collection: String, reason: String },

    /// Seed data could not be loaded at open
    #[error("Failed to load seed data: {0}")]
    Seed(String),
}

impl StoreError {
    pub fn invalid_record(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure was caused by the shape of the caller's pipeline
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoreError::Unsupported(_) | StoreError::InvalidPipeline(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(StoreError::Unsupported("$facet".to_string()).is_client_error());
        assert!(StoreError::InvalidPipeline("$limit".to_string()).is_client_error());
        assert!(!StoreError::Unavailable("down".to_string()).is_client_error());
        assert!(!StoreError::invalid_record("security", "missing table").is_client_error());
    }
}
