//! # Document Store
//!
//! The seam between the query gateway and whatever holds the documents.
//! Security and metadata records live in the same store as the data they
//! protect, in their own collections.
//!
//! [`InMemoryStore`] is the bundled backend: it loads seed collections at
//! open and runs compiled pipelines with a small evaluator.

mod errors;
mod evaluator;
mod memory;

pub use errors::{StoreError, StoreResult};
pub use evaluator::{matches_filter, run_pipeline, validate_filter};
pub use memory::InMemoryStore;

use std::future::Future;
use std::pin::Pin;

use crate::value::Document;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// A document store that can filter and aggregate collections
pub trait DocumentStore: Send + Sync {
    /// Returns every document in `collection` matching `filter`
    fn find<'a>(&'a self, collection: &'a str, filter: &'a Document) -> StoreFuture<'a, Vec<Document>>;

    /// Runs `pipeline` against `collection` and returns the result rows
    fn aggregate<'a>(
        &'a self,
        collection: &'a str,
        pipeline: &'a [Document],
    ) -> StoreFuture<'a, Vec<Document>>;
}
