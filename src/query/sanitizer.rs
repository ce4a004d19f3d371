//! # Tree Sanitizer
//!
//! Walks an untrusted value tree, checking every structural key against the
//! operator allow-list and passing every leaf through a rewrite function.
//!
//! ## Invariants
//! - Fail closed: one unsafe key anywhere rejects the whole document
//! - Keys are never rewritten, only leaves
//! - Array order and length are preserved
//! - Deterministic, no side effects
//!
//! `QueryValue` owns its children, so a tree cannot contain a cycle or a
//! shared subgraph. The walk is a plain recursive descent bounded by
//! [`MAX_NESTING_DEPTH`] so hostile nesting fails instead of exhausting the
//! stack.

use super::allowlist::is_safe_key;
use super::date::coerce_leaf;
use super::errors::{QueryError, QueryResult};
use crate::value::{Document, QueryValue};

/// Deepest nesting the sanitizer will descend into
pub const MAX_NESTING_DEPTH: usize = 256;

/// Whether structural keys are checked during the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyCheck {
    /// Client input: every key must pass the allow-list
    Enforce,
    /// Administrator-authored predicates: keys are trusted
    Trusted,
}

/// Sanitizes a client query: allow-list on keys, date coercion on leaves
pub fn sanitize(value: QueryValue) -> QueryResult<QueryValue> {
    sanitize_with(value, &mut coerce_leaf)
}

/// Sanitizes with a caller-supplied leaf rewrite
pub fn sanitize_with<F>(value: QueryValue, rewrite: &mut F) -> QueryResult<QueryValue>
where
    F: FnMut(QueryValue) -> QueryResult<QueryValue>,
{
    walk(value, 0, KeyCheck::Enforce, rewrite)
}

/// Applies date coercion to a trusted document without the key check.
///
/// Security predicates are written by administrators with the same `#...#`
/// convention and may use operators callers cannot.
pub fn coerce_dates(value: QueryValue) -> QueryResult<QueryValue> {
    walk(value, 0, KeyCheck::Trusted, &mut coerce_leaf)
}

fn walk<F>(value: QueryValue, depth: usize, keys: KeyCheck, rewrite: &mut F) -> QueryResult<QueryValue>
where
    F: FnMut(QueryValue) -> QueryResult<QueryValue>,
{
    if depth > MAX_NESTING_DEPTH {
        return Err(QueryError::NestingTooDeep(MAX_NESTING_DEPTH));
    }

    match value {
        QueryValue::Array(items) => {
            let mut result = Vec::with_capacity(items.len());
            for item in items {
                result.push(walk(item, depth + 1, keys, rewrite)?);
            }
            Ok(QueryValue::Array(result))
        }
        QueryValue::Document(doc) => {
            let mut result = Document::with_capacity(doc.len());
            for (key, child) in doc {
                if keys == KeyCheck::Enforce && !is_safe_key(&key) {
                    return Err(QueryError::UnsafeOperator(key));
                }
                let child = walk(child, depth + 1, keys, rewrite)?;
                result.insert(key, child);
            }
            Ok(QueryValue::Document(result))
        }
        leaf => rewrite(leaf),
    }
}
