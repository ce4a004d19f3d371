//! # Response Formatting
//!
//! Result rows leave the gateway without the store's internal identity
//! field and with top-level dates rendered as text.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::query::{CollectionResolution, SecurityRecord};
use crate::value::{Document, QueryValue};

/// Internal identity field dropped from every row
pub const ID_FIELD: &str = "_id";

/// Default output format for top-level dates
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a result row for the client
pub fn format_row(row: Document, date_format: &str) -> Value {
    let mut out = Map::with_capacity(row.len());
    for (key, value) in row {
        if key == ID_FIELD {
            continue;
        }
        let rendered = match value {
            QueryValue::Date(date) => Value::String(date.format(date_format).to_string()),
            other => other.to_json(),
        };
        out.insert(key, rendered);
    }
    Value::Object(out)
}

/// Query result rows
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub data: Vec<Value>,
    pub count: usize,
}

impl ListResponse {
    pub fn new(data: Vec<Value>) -> Self {
        let count = data.len();
        Self { data, count }
    }
}

/// Resolved collection mapping for a table
#[derive(Debug, Clone, Serialize)]
pub struct MetaResponse {
    pub api: String,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    pub defaulting: bool,
}

impl From<CollectionResolution> for MetaResponse {
    fn from(resolution: CollectionResolution) -> Self {
        Self {
            api: resolution.api,
            collection: resolution.collection,
            package: resolution.package,
            defaulting: resolution.using_default,
        }
    }
}

/// One grant visible to the caller. The predicate is never disclosed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub table: String,
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<u64>,
}

impl From<&SecurityRecord> for SubscriptionResponse {
    fn from(record: &SecurityRecord) -> Self {
        Self {
            table: record.table.clone(),
            package: record.package.clone(),
            row_limit: record.row_limit.filter(|n| *n > 0),
        }
    }
}
