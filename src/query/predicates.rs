//! # Row-Security Predicate Store
//!
//! Looks up the administrator-defined grants that decide which rows a
//! caller may see, and the metadata that maps a logical table to its
//! physical collection. Both live in the document store itself.
//!
//! ## Invariants
//! - No matching security record means no access; there is no bypass
//! - Predicates are re-read on every request, nothing is cached
//! - Ambiguous metadata never widens access: the first match is used and
//!   the condition is logged for operators

use std::sync::Arc;

use super::errors::{AmbiguousMetadata, QueryError, QueryResult};
use super::sanitizer::coerce_dates;
use crate::store::{validate_filter, DocumentStore, StoreError};
use crate::value::{Document, QueryValue};

/// Default collection holding security records
pub const DEFAULT_SECURITY_COLLECTION: &str = "security";

/// Default collection holding metadata records
pub const DEFAULT_META_COLLECTION: &str = "meta";

/// A (table, package) grant carrying a row filter
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityRecord {
    pub table: String,
    pub package: String,
    pub predicate: Document,
    /// Maximum rows per query; `None` or `Some(0)` means unlimited
    pub row_limit: Option<u64>,
}

impl SecurityRecord {
    /// Decode a record as stored.
    ///
    /// The predicate is read from `predicate` (a document) or from `pre`,
    /// which may hold the document itself or its JSON encoding. The row
    /// limit is read from `rowLimit` or `limit`.
    pub fn from_document(collection: &str, doc: &Document) -> Result<Self, StoreError> {
        let table = required_str(collection, doc, "table")?;
        let package = required_str(collection, doc, "package")?;

        let predicate = match doc.get("predicate").or_else(|| doc.get("pre")) {
            Some(QueryValue::Document(predicate)) => predicate.clone(),
            Some(QueryValue::String(encoded)) => decode_predicate(collection, encoded)?,
            Some(QueryValue::Null) | None => {
                return Err(StoreError::invalid_record(collection, "missing predicate"))
            }
            Some(_) => {
                return Err(StoreError::invalid_record(
                    collection,
                    "predicate must be a document",
                ))
            }
        };

        let row_limit = match doc.get("rowLimit").or_else(|| doc.get("limit")) {
            None | Some(QueryValue::Null) => None,
            Some(value) => match value.as_i64() {
                Some(n) if n >= 0 => Some(n as u64),
                _ => {
                    return Err(StoreError::invalid_record(
                        collection,
                        "rowLimit must be a non-negative integer",
                    ))
                }
            },
        };

        Ok(Self {
            table,
            package,
            predicate,
            row_limit,
        })
    }

    /// Whether this grant places no cap on rows
    pub fn is_unlimited(&self) -> bool {
        matches!(self.row_limit, None | Some(0))
    }
}

fn required_str(collection: &str, doc: &Document, key: &str) -> Result<String, StoreError> {
    doc.get_str(key)
        .map(str::to_string)
        .ok_or_else(|| StoreError::invalid_record(collection, format!("missing '{}'", key)))
}

fn decode_predicate(collection: &str, encoded: &str) -> Result<Document, StoreError> {
    let value: QueryValue = serde_json::from_str(encoded)
        .map_err(|e| StoreError::invalid_record(collection, format!("predicate is not JSON: {}", e)))?;
    match value {
        QueryValue::Document(doc) => Ok(doc),
        _ => Err(StoreError::invalid_record(
            collection,
            "predicate must be a document",
        )),
    }
}

/// Maps a logical table to a physical collection for one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    pub api: String,
    pub package: String,
    pub collection: String,
}

impl MetaRecord {
    pub fn from_document(collection: &str, doc: &Document) -> Result<Self, StoreError> {
        Ok(Self {
            api: required_str(collection, doc, "api")?,
            package: required_str(collection, doc, "package")?,
            collection: required_str(collection, doc, "collection")?,
        })
    }
}

/// Where a table's rows physically live for a given caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionResolution {
    pub api: String,
    pub collection: String,
    /// Package of the metadata record used, if one matched
    pub package: Option<String>,
    /// True when no metadata matched and the table name is used directly
    pub using_default: bool,
    /// Set when several metadata records matched
    pub ambiguity: Option<AmbiguousMetadata>,
}

/// Reads security and metadata records from the store
#[derive(Clone)]
pub struct PredicateStore {
    store: Arc<dyn DocumentStore>,
    security_collection: String,
    meta_collection: String,
}

impl PredicateStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            security_collection: DEFAULT_SECURITY_COLLECTION.to_string(),
            meta_collection: DEFAULT_META_COLLECTION.to_string(),
        }
    }

    pub fn with_collections(
        mut self,
        security_collection: impl Into<String>,
        meta_collection: impl Into<String>,
    ) -> Self {
        self.security_collection = security_collection.into();
        self.meta_collection = meta_collection.into();
        self
    }

    /// The store the records are read from
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// All security records for `table` granted to any of `packages`.
    ///
    /// May be empty; predicates are returned as stored.
    pub async fn security_records(
        &self,
        table: &str,
        packages: &[String],
    ) -> QueryResult<Vec<SecurityRecord>> {
        let filter = scoped_filter("table", table, packages);
        let docs = self.store.find(&self.security_collection, &filter).await?;

        docs.iter()
            .map(|doc| SecurityRecord::from_document(&self.security_collection, doc))
            .collect::<Result<_, _>>()
            .map_err(QueryError::from)
    }

    /// Security records that apply to the caller, with predicate dates
    /// coerced. Fails with [`QueryError::AccessDenied`] when none apply.
    ///
    /// A predicate the store could not evaluate is an administrator error
    /// and surfaces as [`StoreError::InvalidRecord`], never as a client one.
    pub async fn predicates_for(
        &self,
        table: &str,
        packages: &[String],
    ) -> QueryResult<Vec<SecurityRecord>> {
        let records = self.security_records(table, packages).await?;
        if records.is_empty() {
            tracing::info!(table, ?packages, "no security record grants access");
            return Err(QueryError::AccessDenied);
        }

        records
            .into_iter()
            .map(|mut record| -> QueryResult<SecurityRecord> {
                record.predicate = match coerce_dates(QueryValue::Document(record.predicate))? {
                    QueryValue::Document(doc) => doc,
                    _ => Document::new(),
                };
                if let Err(e) = validate_filter(&record.predicate) {
                    tracing::error!(
                        table = %record.table,
                        package = %record.package,
                        error = %e,
                        "security predicate cannot be evaluated"
                    );
                    return Err(StoreError::invalid_record(
                        &self.security_collection,
                        format!(
                            "predicate for table '{}' package '{}' is invalid",
                            record.table, record.package
                        ),
                    )
                    .into());
                }
                Ok(record)
            })
            .collect()
    }

    /// Resolve the physical collection behind `table` for the caller
    pub async fn resolve_collection(
        &self,
        table: &str,
        packages: &[String],
    ) -> QueryResult<CollectionResolution> {
        let filter = scoped_filter("api", table, packages);
        let docs = self.store.find(&self.meta_collection, &filter).await?;

        let records = docs
            .iter()
            .map(|doc| MetaRecord::from_document(&self.meta_collection, doc))
            .collect::<Result<Vec<_>, _>>()?;

        let Some(first) = records.first() else {
            return Ok(CollectionResolution {
                api: table.to_string(),
                collection: table.to_string(),
                package: None,
                using_default: true,
                ambiguity: None,
            });
        };

        let ambiguity = (records.len() > 1).then(|| AmbiguousMetadata {
            api: table.to_string(),
            packages: packages.to_vec(),
            matches: records.len(),
            chosen: first.collection.clone(),
        });
        if let Some(ambiguity) = &ambiguity {
            tracing::warn!(
                api = %ambiguity.api,
                packages = ?ambiguity.packages,
                matches = ambiguity.matches,
                chosen = %ambiguity.chosen,
                "{}",
                ambiguity
            );
        }

        Ok(CollectionResolution {
            api: first.api.clone(),
            collection: first.collection.clone(),
            package: Some(first.package.clone()),
            using_default: false,
            ambiguity,
        })
    }
}

/// `{<key>: <value>, package: {$in: packages}}`
fn scoped_filter(key: &str, value: &str, packages: &[String]) -> Document {
    let packages: Vec<QueryValue> = packages.iter().map(|p| QueryValue::from(p.as_str())).collect();

    let mut filter = Document::with_capacity(2);
    filter.insert(key, value);
    filter.insert("package", Document::single("$in", packages));
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn packages(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn predicate_store(seed: serde_json::Value) -> PredicateStore {
        let store = InMemoryStore::from_seed(seed).unwrap();
        PredicateStore::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_records_filtered_by_table_and_package() {
        let store = predicate_store(json!({
            "security": [
                {"table": "sales", "package": "gold", "predicate": {"region": "north"}},
                {"table": "sales", "package": "silver", "predicate": {"region": "south"}},
                {"table": "stock", "package": "gold", "predicate": {}}
            ]
        }));

        let records = store.predicates_for("sales", &packages(&["gold"])).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].predicate.get_str("region"), Some("north"));
    }

    #[tokio::test]
    async fn test_no_record_is_access_denied() {
        let store = predicate_store(json!({
            "security": [{"table": "sales", "package": "gold", "predicate": {}}]
        }));

        let result = store.predicates_for("sales", &packages(&["anonymous"])).await;
        assert!(matches!(result, Err(QueryError::AccessDenied)));

        let result = store.predicates_for("missing", &packages(&["gold"])).await;
        assert!(matches!(result, Err(QueryError::AccessDenied)));
    }

    #[tokio::test]
    async fn test_encoded_predicate_is_decoded_and_dates_coerced() {
        let store = predicate_store(json!({
            "security": [{
                "table": "sales",
                "package": "gold",
                "pre": "{\"when\": {\"$gte\": \"#2021-01-01#\"}}",
                "limit": 500
            }]
        }));

        let records = store.predicates_for("sales", &packages(&["gold"])).await.unwrap();
        let expected = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            records[0].predicate.get_path("when.$gte"),
            Some(&QueryValue::Date(expected))
        );
        assert_eq!(records[0].row_limit, Some(500));
    }

    #[tokio::test]
    async fn test_invalid_record_is_store_error() {
        let store = predicate_store(json!({
            "security": [{"table": "sales", "package": "gold", "pre": "not json"}]
        }));

        let result = store.predicates_for("sales", &packages(&["gold"])).await;
        assert!(matches!(result, Err(QueryError::Store(StoreError::InvalidRecord { .. }))));
    }

    #[tokio::test]
    async fn test_unevaluable_predicate_is_server_error() {
        let store = predicate_store(json!({
            "security": [
                {"table": "people", "package": "gold", "predicate": {"ssn": {"$regex": "^(SECRET-TENANT-42"}}},
                {"table": "stock", "package": "gold", "predicate": {"sku": {"$in": "abc"}}}
            ]
        }));

        for table in ["people", "stock"] {
            let err = store.predicates_for(table, &packages(&["gold"])).await.unwrap_err();
            assert!(matches!(err, QueryError::Store(StoreError::InvalidRecord { .. })));
            assert_eq!(err.status_code(), 500);
            assert!(!err.to_string().contains("SECRET"));
        }
    }

    #[tokio::test]
    async fn test_resolve_collection_falls_back_to_table_name() {
        let store = predicate_store(json!({"meta": []}));

        let resolution = store.resolve_collection("sales", &packages(&["gold"])).await.unwrap();
        assert_eq!(resolution.collection, "sales");
        assert!(resolution.using_default);
        assert!(resolution.ambiguity.is_none());
    }

    #[tokio::test]
    async fn test_resolve_collection_uses_package_mapping() {
        let store = predicate_store(json!({
            "meta": [
                {"api": "sales", "package": "gold", "collection": "sales_v2"},
                {"api": "sales", "package": "silver", "collection": "sales_legacy"}
            ]
        }));

        let resolution = store.resolve_collection("sales", &packages(&["silver"])).await.unwrap();
        assert_eq!(resolution.collection, "sales_legacy");
        assert_eq!(resolution.package.as_deref(), Some("silver"));
        assert!(!resolution.using_default);
    }

    #[tokio::test]
    async fn test_ambiguous_metadata_picks_first_and_reports() {
        let store = predicate_store(json!({
            "meta": [
                {"api": "sales", "package": "gold", "collection": "sales_v2"},
                {"api": "sales", "package": "silver", "collection": "sales_legacy"}
            ]
        }));

        let resolution = store
            .resolve_collection("sales", &packages(&["gold", "silver"]))
            .await
            .unwrap();
        assert_eq!(resolution.collection, "sales_v2");

        let ambiguity = resolution.ambiguity.unwrap();
        assert_eq!(ambiguity.matches, 2);
        assert_eq!(ambiguity.chosen, "sales_v2");
    }

    #[test]
    fn test_unlimited_row_limits() {
        let mut record = SecurityRecord {
            table: "t".to_string(),
            package: "p".to_string(),
            predicate: Document::new(),
            row_limit: None,
        };
        assert!(record.is_unlimited());

        record.row_limit = Some(0);
        assert!(record.is_unlimited());

        record.row_limit = Some(10);
        assert!(!record.is_unlimited());
    }
}
