//! Compiler Invariant Tests
//!
//! End-to-end compilation against an in-memory store:
//! - The row-security stage is always first and never merged
//! - No grant means no pipeline and no execution
//! - Unsafe operators are rejected at any depth
//! - Sentinel dates are coerced in client queries and in grants
//! - Row caps apply only when enforcement is on
//! - Grant and metadata lookups run together and both must succeed

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rowgate::auth::{AuthorizationContext, ContextResolver};
use rowgate::query::{
    sanitize, CompilerConfig, PredicateStore, QueryCompiler, QueryError,
};
use rowgate::store::{DocumentStore, InMemoryStore, StoreError, StoreFuture};
use rowgate::value::{Document, QueryValue};
use serde_json::json;
use tokio::sync::Barrier;

// =============================================================================
// Helper Functions
// =============================================================================

/// Wraps a store and counts calls to each operation.
struct CountingStore {
    inner: InMemoryStore,
    finds: AtomicUsize,
    aggregates: AtomicUsize,
}

impl CountingStore {
    fn new(seed: serde_json::Value) -> Self {
        Self {
            inner: InMemoryStore::from_seed(seed).unwrap(),
            finds: AtomicUsize::new(0),
            aggregates: AtomicUsize::new(0),
        }
    }
}

impl DocumentStore for CountingStore {
    fn find<'a>(&'a self, collection: &'a str, filter: &'a Document) -> StoreFuture<'a, Vec<Document>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(collection, filter)
    }

    fn aggregate<'a>(
        &'a self,
        collection: &'a str,
        pipeline: &'a [Document],
    ) -> StoreFuture<'a, Vec<Document>> {
        self.aggregates.fetch_add(1, Ordering::SeqCst);
        self.inner.aggregate(collection, pipeline)
    }
}

/// Fails every lookup.
struct UnavailableStore;

impl DocumentStore for UnavailableStore {
    fn find<'a>(&'a self, _: &'a str, _: &'a Document) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(async { Err(StoreError::Unavailable("connection refused".to_string())) })
    }

    fn aggregate<'a>(&'a self, _: &'a str, _: &'a [Document]) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(async { Err(StoreError::Unavailable("connection refused".to_string())) })
    }
}

/// Every lookup starts and then never completes.
#[derive(Default)]
struct StalledStore {
    finds: AtomicUsize,
    aggregates: AtomicUsize,
}

impl DocumentStore for StalledStore {
    fn find<'a>(&'a self, _: &'a str, _: &'a Document) -> StoreFuture<'a, Vec<Document>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        Box::pin(std::future::pending::<Result<Vec<Document>, StoreError>>())
    }

    fn aggregate<'a>(&'a self, _: &'a str, _: &'a [Document]) -> StoreFuture<'a, Vec<Document>> {
        self.aggregates.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Holds each lookup until every barrier party has arrived.
struct RendezvousStore {
    inner: InMemoryStore,
    barrier: Barrier,
}

impl DocumentStore for RendezvousStore {
    fn find<'a>(&'a self, collection: &'a str, filter: &'a Document) -> StoreFuture<'a, Vec<Document>> {
        Box::pin(async move {
            self.barrier.wait().await;
            self.inner.find(collection, filter).await
        })
    }

    fn aggregate<'a>(
        &'a self,
        collection: &'a str,
        pipeline: &'a [Document],
    ) -> StoreFuture<'a, Vec<Document>> {
        self.inner.aggregate(collection, pipeline)
    }
}

/// Grants resolve normally; the metadata collection is unreachable.
struct MetaOutageStore {
    inner: InMemoryStore,
}

impl DocumentStore for MetaOutageStore {
    fn find<'a>(&'a self, collection: &'a str, filter: &'a Document) -> StoreFuture<'a, Vec<Document>> {
        if collection == "meta" {
            return Box::pin(async { Err(StoreError::Unavailable("meta shard down".to_string())) });
        }
        self.inner.find(collection, filter)
    }

    fn aggregate<'a>(
        &'a self,
        collection: &'a str,
        pipeline: &'a [Document],
    ) -> StoreFuture<'a, Vec<Document>> {
        self.inner.aggregate(collection, pipeline)
    }
}

fn seed() -> serde_json::Value {
    json!({
        "security": [
            {"table": "sales", "package": "gold", "predicate": {"region": "north"}, "rowLimit": 2},
            {"table": "sales", "package": "gold", "predicate": {"region": "south"}, "rowLimit": 5},
            {"table": "sales", "package": "silver", "pre": "{\"since\": {\"$gte\": \"#2021-01-01#\"}}"},
            {"table": "sales", "package": "anonymous", "predicate": {"public": true}}
        ],
        "meta": [
            {"api": "sales", "package": "gold", "collection": "sales_2021"}
        ],
        "sales_2021": [
            {"_id": 1, "region": "north", "amount": 10},
            {"_id": 2, "region": "north", "amount": 20},
            {"_id": 3, "region": "south", "amount": 30},
            {"_id": 4, "region": "east", "amount": 40}
        ]
    })
}

fn compiler_over(store: Arc<dyn DocumentStore>, enforce_row_limit: bool) -> QueryCompiler {
    QueryCompiler::new(PredicateStore::new(store), CompilerConfig { enforce_row_limit })
}

fn ctx(permissions: &[&str]) -> AuthorizationContext {
    let permissions: Vec<String> = permissions.iter().map(|s| s.to_string()).collect();
    ContextResolver::default().context_for("tester", &permissions)
}

fn query(value: serde_json::Value) -> Option<QueryValue> {
    Some(QueryValue::from(value))
}

fn pipeline_json(pipeline: &[Document]) -> serde_json::Value {
    serde_json::Value::Array(pipeline.iter().map(Document::to_json).collect())
}

// =============================================================================
// Pipeline Shape Tests
// =============================================================================

/// Two grants, empty query: one stage filtering on P1 OR P2.
#[tokio::test]
async fn test_two_grants_empty_query() {
    let compiler = compiler_over(Arc::new(CountingStore::new(seed())), false);

    let compiled = compiler.compile("sales", &ctx(&["api:gold"]), None).await.unwrap();

    assert_eq!(
        pipeline_json(&compiled.pipeline),
        json!([{"$match": {"$or": [{"region": "north"}, {"region": "south"}]}}])
    );
    assert_eq!(compiled.collection_name(), "sales_2021");
    assert!(!compiled.collection.using_default);
}

/// Client pipeline stages follow the security stage in order.
#[tokio::test]
async fn test_client_pipeline_order_preserved() {
    let compiler = compiler_over(Arc::new(CountingStore::new(seed())), false);

    let compiled = compiler
        .compile(
            "sales",
            &ctx(&["api:gold"]),
            query(json!([
                {"$group": {"_id": "$region", "total": {"$sum": "$amount"}}},
                {"$sort": {"total": -1}}
            ])),
        )
        .await
        .unwrap();

    let stages = pipeline_json(&compiled.pipeline);
    assert_eq!(stages.as_array().unwrap().len(), 3);
    assert!(stages[0]["$match"]["$or"].is_array());
    assert_eq!(stages[1], json!({"$group": {"_id": "$region", "total": {"$sum": "$amount"}}}));
    assert_eq!(stages[2], json!({"$sort": {"total": -1}}));
}

/// A bare filter becomes a second $match; the security stage is untouched.
#[tokio::test]
async fn test_bare_filter_not_merged() {
    let compiler = compiler_over(Arc::new(CountingStore::new(seed())), false);

    let compiled = compiler
        .compile("sales", &ctx(&["api:gold"]), query(json!({"amount": {"$gt": 15}})))
        .await
        .unwrap();

    assert_eq!(
        pipeline_json(&compiled.pipeline),
        json!([
            {"$match": {"$or": [{"region": "north"}, {"region": "south"}]}},
            {"$match": {"amount": {"$gt": 15}}}
        ])
    );
}

/// A client $or cannot widen the security filter.
#[tokio::test]
async fn test_client_or_cannot_widen_access() {
    let store = Arc::new(CountingStore::new(seed()));
    let compiler = compiler_over(store.clone(), false);

    let compiled = compiler
        .compile(
            "sales",
            &ctx(&["api:gold"]),
            query(json!({"$or": [{"region": "east"}, {"region": {"$exists": true}}]})),
        )
        .await
        .unwrap();

    let rows = store
        .aggregate(compiled.collection_name(), &compiled.pipeline)
        .await
        .unwrap();
    let regions: Vec<&str> = rows.iter().filter_map(|r| r.get_str("region")).collect();
    assert_eq!(regions, vec!["north", "north", "south"]);
}

// =============================================================================
// Authorization Gate Tests
// =============================================================================

/// No grant: AccessDenied and the gateway is never invoked.
#[tokio::test]
async fn test_no_grant_is_denied_without_execution() {
    let store = Arc::new(CountingStore::new(seed()));
    let compiler = compiler_over(store.clone(), false);

    let result = compiler.compile("sales", &ctx(&["api:bronze"]), None).await;
    assert!(matches!(result, Err(QueryError::AccessDenied)));

    let result = compiler.compile("payroll", &ctx(&["api:gold"]), None).await;
    assert!(matches!(result, Err(QueryError::AccessDenied)));

    assert_eq!(store.aggregates.load(Ordering::SeqCst), 0);
}

/// Callers without scoped permissions compile under the anonymous grant.
#[tokio::test]
async fn test_unscoped_permissions_use_anonymous_grant() {
    let compiler = compiler_over(Arc::new(CountingStore::new(seed())), false);

    let caller = ctx(&["admin", "billing:read"]);
    assert!(caller.is_anonymous());

    let compiled = compiler.compile("sales", &caller, None).await.unwrap();
    assert_eq!(
        pipeline_json(&compiled.pipeline),
        json!([{"$match": {"$or": [{"public": true}]}}])
    );
    assert!(compiled.collection.using_default);
    assert_eq!(compiled.collection_name(), "sales");
}

/// Store failures propagate; there is no fallback to an unfiltered query.
#[tokio::test]
async fn test_store_failure_aborts_compilation() {
    let compiler = compiler_over(Arc::new(UnavailableStore), false);

    let result = compiler.compile("sales", &ctx(&["api:gold"]), None).await;
    match result {
        Err(err @ QueryError::Store(StoreError::Unavailable(_))) => {
            assert_eq!(err.status_code(), 500);
        }
        other => panic!("expected store failure, got {:?}", other),
    }
}

// =============================================================================
// Operator Safety Tests
// =============================================================================

/// A lookup stage nested deep inside a facet is still rejected.
#[tokio::test]
async fn test_nested_lookup_rejected() {
    let store = Arc::new(CountingStore::new(seed()));
    let compiler = compiler_over(store.clone(), false);

    let result = compiler
        .compile(
            "sales",
            &ctx(&["api:gold"]),
            query(json!([
                {"$facet": {"a": [{"$match": {"x": 1}}, {"$lookup": {"from": "users", "as": "u"}}]}}
            ])),
        )
        .await;

    match result {
        Err(QueryError::UnsafeOperator(key)) => assert_eq!(key, "$lookup"),
        other => panic!("expected unsafe operator, got {:?}", other),
    }
    assert_eq!(store.aggregates.load(Ordering::SeqCst), 0);
}

/// Casing and padding do not smuggle an operator past the allow-list.
#[tokio::test]
async fn test_operator_casing_and_padding() {
    let compiler = compiler_over(Arc::new(CountingStore::new(seed())), false);

    for stage in ["$Out", " $merge", "$currentOp "] {
        let result = compiler
            .compile("sales", &ctx(&["api:gold"]), query(json!([{ stage: "x" }])))
            .await;
        assert!(matches!(result, Err(QueryError::UnsafeOperator(_))), "{}", stage);
    }

    let compiled = compiler
        .compile("sales", &ctx(&["api:gold"]), query(json!([{" $LIMIT ": 1}])))
        .await;
    assert!(compiled.is_ok());
}

/// Sanitizing an already sanitized tree changes nothing.
#[test]
fn test_sanitize_idempotent() {
    let input = QueryValue::from(json!([
        {"$match": {"at": {"$gte": "#2021-05-01#"}, "note": "a#b#"}},
        {"$project": {"name": 1}}
    ]));

    let once = sanitize(input).unwrap();
    let twice = sanitize(once.clone()).unwrap();
    assert_eq!(once, twice);
}

// =============================================================================
// Date Coercion Tests
// =============================================================================

/// Sentinel dates are coerced in client queries and in stored grants.
#[tokio::test]
async fn test_dates_coerced_in_query_and_grant() {
    let compiler = compiler_over(Arc::new(CountingStore::new(seed())), false);

    let compiled = compiler
        .compile(
            "sales",
            &ctx(&["api:silver"]),
            query(json!({"closed": {"$lt": "#2022-06-30#"}})),
        )
        .await
        .unwrap();

    let grant_date = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
    let query_date = Utc.with_ymd_and_hms(2022, 6, 30, 0, 0, 0).unwrap();

    assert_eq!(
        compiled.pipeline[0].get_path("$match.$or.0.since.$gte"),
        Some(&QueryValue::Date(grant_date))
    );
    assert_eq!(
        compiled.pipeline[1].get_path("$match.closed.$lt"),
        Some(&QueryValue::Date(query_date))
    );
}

/// A malformed sentinel aborts compilation.
#[tokio::test]
async fn test_invalid_date_literal_rejected() {
    let compiler = compiler_over(Arc::new(CountingStore::new(seed())), false);

    let result = compiler
        .compile("sales", &ctx(&["api:gold"]), query(json!({"at": "#bad-date#"})))
        .await;
    assert!(matches!(result, Err(QueryError::InvalidDateLiteral(_))));
}

// =============================================================================
// Row Limit Tests
// =============================================================================

/// With enforcement on, the largest grant limit caps the result.
#[tokio::test]
async fn test_row_limit_enforced() {
    let store = Arc::new(CountingStore::new(seed()));
    let compiler = compiler_over(store.clone(), true);

    let compiled = compiler.compile("sales", &ctx(&["api:gold"]), None).await.unwrap();
    assert_eq!(
        compiled.pipeline.last().map(Document::to_json),
        Some(json!({"$limit": 5}))
    );
}

/// An unlimited grant lifts the cap entirely.
#[tokio::test]
async fn test_row_limit_lifted_by_unlimited_grant() {
    let compiler = compiler_over(Arc::new(CountingStore::new(seed())), true);

    let compiled = compiler
        .compile("sales", &ctx(&["api:gold", "api:silver"]), None)
        .await
        .unwrap();
    assert_eq!(compiled.pipeline.len(), 1);
}

/// With enforcement off, grant limits are ignored.
#[tokio::test]
async fn test_row_limit_not_enforced() {
    let compiler = compiler_over(Arc::new(CountingStore::new(seed())), false);

    let compiled = compiler.compile("sales", &ctx(&["api:gold"]), None).await.unwrap();
    assert_eq!(compiled.pipeline.len(), 1);
}

// =============================================================================
// Concurrent Lookup Tests
// =============================================================================

/// Grant and metadata lookups are in flight at the same time.
#[tokio::test]
async fn test_lookups_issued_concurrently() {
    let store = RendezvousStore {
        inner: InMemoryStore::from_seed(seed()).unwrap(),
        barrier: Barrier::new(2),
    };
    let compiler = compiler_over(Arc::new(store), false);

    // Sequential lookups would leave the first one waiting on the barrier.
    let compiled = tokio::time::timeout(
        Duration::from_secs(5),
        compiler.compile("sales", &ctx(&["api:gold"]), None),
    )
    .await
    .expect("lookups did not overlap")
    .unwrap();

    assert_eq!(compiled.collection_name(), "sales_2021");
    assert_eq!(compiled.pipeline.len(), 1);
}

/// A cancelled compilation yields no pipeline and never executes.
#[tokio::test]
async fn test_cancelled_compile_never_executes() {
    let store = Arc::new(StalledStore::default());
    let compiler = compiler_over(store.clone(), false);

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        compiler.compile("sales", &ctx(&["api:gold"]), None),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(store.finds.load(Ordering::SeqCst), 2);
    assert_eq!(store.aggregates.load(Ordering::SeqCst), 0);
}

/// Metadata failure fails the compile even when grants resolve.
#[tokio::test]
async fn test_metadata_failure_fails_compilation() {
    let store = MetaOutageStore {
        inner: InMemoryStore::from_seed(seed()).unwrap(),
    };
    let compiler = compiler_over(Arc::new(store), false);

    let result = compiler.compile("sales", &ctx(&["api:gold"]), None).await;
    match result {
        Err(err @ QueryError::Store(StoreError::Unavailable(_))) => {
            assert_eq!(err.status_code(), 500);
        }
        other => panic!("expected metadata failure, got {:?}", other),
    }
}
