//! # Query Pipeline
//!
//! Untrusted client queries are sanitized against an operator allow-list,
//! their `#...#` date literals coerced, and the result compiled behind the
//! caller's row-security predicates.

mod allowlist;
mod compiler;
mod date;
mod errors;
mod predicates;
mod sanitizer;

pub use allowlist::{is_safe_key, OPERATOR_PREFIX, SAFE_OPERATORS, SAFE_STAGES};
pub use compiler::{
    assemble, row_limit, row_security_stage, CompiledQuery, CompilerConfig, QueryCompiler,
};
pub use date::{coerce_leaf, is_date_literal, parse_date, DATE_SENTINEL};
pub use errors::{AmbiguousMetadata, QueryError, QueryResult};
pub use predicates::{
    CollectionResolution, MetaRecord, PredicateStore, SecurityRecord, DEFAULT_META_COLLECTION,
    DEFAULT_SECURITY_COLLECTION,
};
pub use sanitizer::{coerce_dates, sanitize, sanitize_with, MAX_NESTING_DEPTH};
