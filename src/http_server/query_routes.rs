//! Query Gateway Routes
//!
//! Every route authenticates the bearer token, resolves the caller's
//! packages, and only then touches the store.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde_json::Value;

use crate::auth::{AuthError, AuthorizationContext, ContextResolver, JwtManager};
use crate::query::{QueryCompiler, QueryError};
use crate::value::QueryValue;

use super::errors::{RestError, RestResult};
use super::response::{format_row, ListResponse, MetaResponse, SubscriptionResponse};

/// Shared state for the gateway routes
#[derive(Clone)]
pub struct GatewayState {
    pub compiler: QueryCompiler,
    pub jwt: JwtManager,
    pub resolver: ContextResolver,
    pub date_format: String,
}

impl GatewayState {
    pub fn new(
        compiler: QueryCompiler,
        jwt: JwtManager,
        resolver: ContextResolver,
        date_format: impl Into<String>,
    ) -> Self {
        Self {
            compiler,
            jwt,
            resolver,
            date_format: date_format.into(),
        }
    }
}

/// Create gateway routes
pub fn query_routes(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/:table", get(query_handler).post(query_handler))
        .route("/meta/:api", get(meta_handler))
        .route("/subscription/:table", get(subscription_handler))
        .with_state(state)
}

/// Verify the bearer token and resolve the caller's packages
fn extract_context(state: &GatewayState, headers: &HeaderMap) -> RestResult<AuthorizationContext> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::AuthenticationRequired)?;

    let claims = state.jwt.validate_token(token)?;
    Ok(state.resolver.resolve(&claims)?)
}

/// An empty body or JSON `null` is an empty query
fn parse_query(body: &Bytes) -> RestResult<Option<QueryValue>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_slice(body).map_err(|e| RestError::InvalidBody(e.to_string()))?;
    Ok(Some(QueryValue::from(value)))
}

/// Compile and run a client query
async fn query_handler(
    State(state): State<Arc<GatewayState>>,
    Path(table): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> RestResult<Json<ListResponse>> {
    let ctx = extract_context(&state, &headers)?;
    let query = parse_query(&body)?;

    let compiled = state.compiler.compile(&table, &ctx, query).await?;
    let rows = state
        .compiler
        .predicates()
        .store()
        .aggregate(compiled.collection_name(), &compiled.pipeline)
        .await?;

    tracing::info!(
        table = %table,
        packages = ?ctx.packages(),
        collection = %compiled.collection_name(),
        rows = rows.len(),
        "query served"
    );

    let data = rows
        .into_iter()
        .map(|row| format_row(row, &state.date_format))
        .collect();
    Ok(Json(ListResponse::new(data)))
}

/// Resolved collection mapping for the caller
async fn meta_handler(
    State(state): State<Arc<GatewayState>>,
    Path(api): Path<String>,
    headers: HeaderMap,
) -> RestResult<Json<MetaResponse>> {
    let ctx = extract_context(&state, &headers)?;

    let resolution = state
        .compiler
        .predicates()
        .resolve_collection(&api, ctx.packages())
        .await?;
    Ok(Json(MetaResponse::from(resolution)))
}

/// Grants that apply to the caller for a table
async fn subscription_handler(
    State(state): State<Arc<GatewayState>>,
    Path(table): Path<String>,
    headers: HeaderMap,
) -> RestResult<Json<Vec<SubscriptionResponse>>> {
    let ctx = extract_context(&state, &headers)?;

    let records = state
        .compiler
        .predicates()
        .security_records(&table, ctx.packages())
        .await?;
    if records.is_empty() {
        return Err(QueryError::AccessDenied.into());
    }

    Ok(Json(records.iter().map(SubscriptionResponse::from).collect()))
}
