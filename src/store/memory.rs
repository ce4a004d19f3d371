//! In-memory document store
//!
//! Collections are held behind a read-write lock: queries take a snapshot
//! under the read lock and evaluate outside it, administrative writes are
//! rare.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use serde_json::Value;

use super::errors::{StoreError, StoreResult};
use super::evaluator::run_pipeline;
use super::{DocumentStore, StoreFuture};
use crate::query::coerce_dates;
use crate::value::{Document, QueryValue};

/// Document store backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the store, loading seed collections from `seed_path` if given
    pub fn open(seed_path: Option<&Path>) -> StoreResult<Self> {
        let Some(path) = seed_path else {
            tracing::info!("opened empty in-memory store");
            return Ok(Self::new());
        };

        let content = fs::read_to_string(path)
            .map_err(|e| StoreError::Seed(format!("{}: {}", path.display(), e)))?;
        let seed: Value = serde_json::from_str(&content)
            .map_err(|e| StoreError::Seed(format!("{}: {}", path.display(), e)))?;

        let store = Self::from_seed(seed)?;
        tracing::info!(
            seed = %path.display(),
            collections = store.collection_names().len(),
            "opened in-memory store"
        );
        Ok(store)
    }

    /// Build a store from `{"collection": [documents...]}`.
    ///
    /// `#...#` strings in seed documents become dates, the same convention
    /// callers use in queries.
    pub fn from_seed(seed: Value) -> StoreResult<Self> {
        let Value::Object(collections) = seed else {
            return Err(StoreError::Seed(
                "seed must be an object of collections".to_string(),
            ));
        };

        let store = Self::new();
        for (name, documents) in collections {
            let Value::Array(documents) = documents else {
                return Err(StoreError::Seed(format!("collection '{}' must be an array", name)));
            };

            let mut parsed = Vec::with_capacity(documents.len());
            for document in documents {
                let coerced = coerce_dates(QueryValue::from(document))
                    .map_err(|e| StoreError::Seed(format!("collection '{}': {}", name, e)))?;
                match coerced {
                    QueryValue::Document(doc) => parsed.push(doc),
                    _ => {
                        return Err(StoreError::Seed(format!(
                            "collection '{}' must contain only documents",
                            name
                        )))
                    }
                }
            }
            store.insert_many(&name, parsed)?;
        }
        Ok(store)
    }

    /// Append documents to a collection, creating it if needed
    pub fn insert_many(
        &self,
        collection: &str,
        documents: impl IntoIterator<Item = Document>,
    ) -> StoreResult<usize> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        let target = guard.entry(collection.to_string()).or_default();
        let before = target.len();
        target.extend(documents);
        Ok(target.len() - before)
    }

    /// Names of all collections, sorted
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.collections.read() {
            Ok(guard) => guard.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    /// Release the store. Pending snapshots held by in-flight queries stay
    /// valid until they finish.
    pub fn close(self) {
        let collections = self.collection_names().len();
        tracing::info!(collections, "closed in-memory store");
    }

    fn snapshot(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let guard = self
            .collections
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        Ok(guard.get(collection).cloned().unwrap_or_default())
    }
}

impl DocumentStore for InMemoryStore {
    fn find<'a>(&'a self, collection: &'a str, filter: &'a Document) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(async move {
            let docs = self.snapshot(collection)?;
            let stage = Document::single("$match", filter.clone());
            run_pipeline(docs, std::slice::from_ref(&stage))
        })
    }

    fn aggregate<'a>(
        &'a self,
        collection: &'a str,
        pipeline: &'a [Document],
    ) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(async move {
            let docs = self.snapshot(collection)?;
            run_pipeline(docs, pipeline)
        })
    }
}
