//! # Query Compiler
//!
//! Turns an untrusted client query into a pipeline that is safe to run
//! verbatim against the store.
//!
//! ## Pipeline shape
//! - First stage is always `{$match: {$or: [P1, P2, ...]}}`, one disjunct per
//!   applicable security record
//! - A client pipeline (array) follows in its original order
//! - A bare client filter (document) becomes a second, separate `$match`;
//!   it is never merged into the security stage
//! - With row-limit enforcement on, a trailing `$limit` caps the result
//!
//! Compilation fails closed: any error yields no pipeline at all.

use super::errors::{QueryError, QueryResult};
use super::predicates::{CollectionResolution, PredicateStore, SecurityRecord};
use super::sanitizer::sanitize;
use crate::auth::AuthorizationContext;
use crate::value::{Document, QueryValue};

/// Compiler behaviour fixed at deployment time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Append a `$limit` stage capped at the largest `rowLimit` among the
    /// matched security records
    pub enforce_row_limit: bool,
}

/// A compiled pipeline and where to run it
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub table: String,
    pub collection: CollectionResolution,
    pub pipeline: Vec<Document>,
}

impl CompiledQuery {
    /// Physical collection the pipeline targets
    pub fn collection_name(&self) -> &str {
        &self.collection.collection
    }

    /// The pipeline as Extended JSON
    pub fn pipeline_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.pipeline.iter().map(Document::to_json).collect())
    }
}

/// Compiles client queries against the caller's security records
#[derive(Clone)]
pub struct QueryCompiler {
    predicates: PredicateStore,
    config: CompilerConfig,
}

impl QueryCompiler {
    pub fn new(predicates: PredicateStore, config: CompilerConfig) -> Self {
        Self { predicates, config }
    }

    pub fn predicates(&self) -> &PredicateStore {
        &self.predicates
    }

    pub fn config(&self) -> CompilerConfig {
        self.config
    }

    /// Compile `client_query` for `table` on behalf of `ctx`.
    ///
    /// The security and metadata lookups run concurrently; both must succeed
    /// before anything is assembled. `None` (or JSON `null`) means an empty
    /// pipeline.
    pub async fn compile(
        &self,
        table: &str,
        ctx: &AuthorizationContext,
        client_query: Option<QueryValue>,
    ) -> QueryResult<CompiledQuery> {
        let packages = ctx.packages();
        let (records, collection) = tokio::try_join!(
            self.predicates.predicates_for(table, packages),
            self.predicates.resolve_collection(table, packages),
        )?;

        let pipeline = assemble(&records, client_query, self.config)?;

        tracing::debug!(
            table,
            collection = %collection.collection,
            grants = records.len(),
            stages = pipeline.len(),
            "compiled query"
        );

        Ok(CompiledQuery {
            table: table.to_string(),
            collection,
            pipeline,
        })
    }
}

/// Assemble the executable pipeline from matched records and a client query
pub fn assemble(
    records: &[SecurityRecord],
    client_query: Option<QueryValue>,
    config: CompilerConfig,
) -> QueryResult<Vec<Document>> {
    if records.is_empty() {
        return Err(QueryError::AccessDenied);
    }

    let client_query = match client_query {
        None | Some(QueryValue::Null) => QueryValue::Array(Vec::new()),
        Some(query) => query,
    };

    let mut pipeline = vec![row_security_stage(records)];

    match sanitize(client_query)? {
        QueryValue::Array(stages) => {
            pipeline.reserve(stages.len());
            for stage in stages {
                match stage {
                    QueryValue::Document(stage) => pipeline.push(stage),
                    _ => {
                        return Err(QueryError::MalformedQuery(
                            "pipeline stages must be documents".to_string(),
                        ))
                    }
                }
            }
        }
        QueryValue::Document(filter) => pipeline.push(Document::single("$match", filter)),
        _ => {
            return Err(QueryError::MalformedQuery(
                "query must be a filter document or an array of stages".to_string(),
            ))
        }
    }

    if config.enforce_row_limit {
        if let Some(limit) = row_limit(records) {
            pipeline.push(Document::single("$limit", limit as i64));
        }
    }

    Ok(pipeline)
}

/// `{$match: {$or: [predicates...]}}`
pub fn row_security_stage(records: &[SecurityRecord]) -> Document {
    let disjuncts: Vec<QueryValue> = records
        .iter()
        .map(|record| QueryValue::Document(record.predicate.clone()))
        .collect();

    Document::single("$match", Document::single("$or", disjuncts))
}

/// Largest row cap across the records, or `None` if any record is unlimited
pub fn row_limit(records: &[SecurityRecord]) -> Option<u64> {
    if records.iter().any(SecurityRecord::is_unlimited) {
        return None;
    }
    records.iter().filter_map(|r| r.row_limit).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(predicate: serde_json::Value, row_limit: Option<u64>) -> SecurityRecord {
        SecurityRecord {
            table: "sales".to_string(),
            package: "gold".to_string(),
            predicate: QueryValue::from(predicate).as_document().cloned().unwrap(),
            row_limit,
        }
    }

    fn json_of(pipeline: &[Document]) -> serde_json::Value {
        serde_json::Value::Array(pipeline.iter().map(Document::to_json).collect())
    }

    #[test]
    fn test_empty_query_is_security_stage_only() {
        let records = vec![
            record(json!({"region": "north"}), None),
            record(json!({"region": "south"}), None),
        ];

        let pipeline = assemble(&records, None, CompilerConfig::default()).unwrap();
        assert_eq!(
            json_of(&pipeline),
            json!([{"$match": {"$or": [{"region": "north"}, {"region": "south"}]}}])
        );
    }

    #[test]
    fn test_null_query_is_empty_pipeline() {
        let records = vec![record(json!({"a": 1}), None)];
        let pipeline = assemble(&records, Some(QueryValue::Null), CompilerConfig::default()).unwrap();
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_client_pipeline_follows_security_stage() {
        let records = vec![record(json!({"region": "north"}), None)];
        let query = QueryValue::from(json!([
            {"$group": {"_id": "$city", "n": {"$sum": 1}}},
            {"$sort": {"n": -1}}
        ]));

        let pipeline = assemble(&records, Some(query), CompilerConfig::default()).unwrap();
        assert_eq!(
            json_of(&pipeline),
            json!([
                {"$match": {"$or": [{"region": "north"}]}},
                {"$group": {"_id": "$city", "n": {"$sum": 1}}},
                {"$sort": {"n": -1}}
            ])
        );
    }

    #[test]
    fn test_bare_filter_becomes_second_match() {
        let records = vec![record(json!({"region": "north"}), None)];
        let query = QueryValue::from(json!({"age": {"$gt": 30}}));

        let pipeline = assemble(&records, Some(query), CompilerConfig::default()).unwrap();
        assert_eq!(
            json_of(&pipeline),
            json!([
                {"$match": {"$or": [{"region": "north"}]}},
                {"$match": {"age": {"$gt": 30}}}
            ])
        );
    }

    #[test]
    fn test_no_records_denied() {
        let result = assemble(&[], None, CompilerConfig::default());
        assert!(matches!(result, Err(QueryError::AccessDenied)));
    }

    #[test]
    fn test_unsafe_client_query_rejected() {
        let records = vec![record(json!({}), None)];
        let query = QueryValue::from(json!([{"$lookup": {"from": "users"}}]));

        let result = assemble(&records, Some(query), CompilerConfig::default());
        assert!(matches!(result, Err(QueryError::UnsafeOperator(_))));
    }

    #[test]
    fn test_scalar_query_and_scalar_stage_rejected() {
        let records = vec![record(json!({}), None)];

        let result = assemble(&records, Some(QueryValue::from("x")), CompilerConfig::default());
        assert!(matches!(result, Err(QueryError::MalformedQuery(_))));

        let result = assemble(
            &records,
            Some(QueryValue::from(json!([{"$match": {}}, 5]))),
            CompilerConfig::default(),
        );
        assert!(matches!(result, Err(QueryError::MalformedQuery(_))));
    }

    #[test]
    fn test_row_limit_appended_when_enforced() {
        let records = vec![record(json!({"a": 1}), Some(100)), record(json!({"b": 2}), Some(250))];
        let config = CompilerConfig {
            enforce_row_limit: true,
        };

        let pipeline = assemble(&records, Some(QueryValue::from(json!({"x": 1}))), config).unwrap();
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline[2].to_json(), json!({"$limit": 250}));
    }

    #[test]
    fn test_row_limit_skipped_when_any_grant_unlimited() {
        let records = vec![record(json!({"a": 1}), Some(100)), record(json!({"b": 2}), Some(0))];
        let config = CompilerConfig {
            enforce_row_limit: true,
        };

        let pipeline = assemble(&records, None, config).unwrap();
        assert_eq!(pipeline.len(), 1);
        assert_eq!(row_limit(&records), None);
    }

    #[test]
    fn test_row_limit_ignored_when_not_enforced() {
        let records = vec![record(json!({"a": 1}), Some(100))];

        let pipeline = assemble(&records, None, CompilerConfig::default()).unwrap();
        assert_eq!(pipeline.len(), 1);
    }
}
