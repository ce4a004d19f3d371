//! # Query Errors
//!
//! Every failure that aborts compilation. None of them produce a partial
//! pipeline: the caller either gets a complete compiled query or one of
//! these.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for query compilation
pub type QueryResult<T> = Result<T, QueryError>;

/// Compilation errors
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    // ==================
    // Client Errors
    // ==================
    /// A structural key outside the operator allow-list
    #[error("Operator not supported: {0}")]
    UnsafeOperator(String),

    /// A `#...#` literal that does not parse as a date
    #[error("Invalid date literal: {0}")]
    InvalidDateLiteral(String),

    /// The query nests deeper than the sanitizer will walk
    #[error("Query nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// The query is neither a filter document nor an array of stages
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    // ==================
    // Authorization
    // ==================
    /// No security record grants the caller's packages access.
    ///
    /// Deliberately says nothing about whether the table exists.
    #[error("You don't have access to this table")]
    AccessDenied,

    // ==================
    // Store
    // ==================
    /// Predicate or metadata lookup failed
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl QueryError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::UnsafeOperator(_) => 400,
            QueryError::InvalidDateLiteral(_) => 400,
            QueryError::NestingTooDeep(_) => 400,
            QueryError::MalformedQuery(_) => 400,
            QueryError::AccessDenied => 403,
            QueryError::Store(e) if e.is_client_error() => 400,
            QueryError::Store(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

/// More than one metadata record redirected the same table.
///
/// Not fatal: the first match is used. Surfaced to operators as a
/// configuration defect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ambiguous collection mapping for '{api}': {matches} metadata records matched, using '{chosen}'")]
pub struct AmbiguousMetadata {
    pub api: String,
    pub packages: Vec<String>,
    pub matches: usize,
    pub chosen: String,
}
