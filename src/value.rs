//! # Query Values
//!
//! The document tree that flows through sanitization, compilation and
//! execution. Unlike `serde_json::Value` it carries a native date variant,
//! so a coerced `#...#` literal stays a date all the way to the store.
//!
//! Documents keep insertion order: stages such as `$sort` depend on it.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;

/// A node in a query or result document
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<QueryValue>),
    Document(Document),
}

impl QueryValue {
    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            QueryValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            QueryValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[QueryValue]> {
        match self {
            QueryValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            QueryValue::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Integer view; doubles with no fractional part count as integers
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            QueryValue::Int(n) => Some(*n),
            QueryValue::Double(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            QueryValue::Int(n) => Some(*n as f64),
            QueryValue::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Mongo-style truthiness used by projections (`1`, `true` include)
    pub fn is_truthy(&self) -> bool {
        match self {
            QueryValue::Null => false,
            QueryValue::Bool(b) => *b,
            QueryValue::Int(n) => *n != 0,
            QueryValue::Double(f) => *f != 0.0,
            _ => true,
        }
    }

    /// Rank of the value's type in the cross-type sort order
    fn type_rank(&self) -> u8 {
        match self {
            QueryValue::Null => 0,
            QueryValue::Int(_) | QueryValue::Double(_) => 1,
            QueryValue::String(_) => 2,
            QueryValue::Document(_) => 3,
            QueryValue::Array(_) => 4,
            QueryValue::Bool(_) => 5,
            QueryValue::Date(_) => 6,
        }
    }

    /// Compares two values of the same kind.
    ///
    /// Returns `None` when the values are not comparable (different kinds,
    /// or composite values), which range operators treat as "no match".
    pub fn partial_compare(&self, other: &QueryValue) -> Option<Ordering> {
        match (self, other) {
            (QueryValue::Null, QueryValue::Null) => Some(Ordering::Equal),
            (QueryValue::Bool(a), QueryValue::Bool(b)) => Some(a.cmp(b)),
            (QueryValue::String(a), QueryValue::String(b)) => Some(a.cmp(b)),
            (QueryValue::Date(a), QueryValue::Date(b)) => Some(a.cmp(b)),
            (QueryValue::Int(a), QueryValue::Int(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Total order used for sorting: type rank first, then natural order
    pub fn sort_compare(&self, other: &QueryValue) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        self.partial_compare(other).unwrap_or(Ordering::Equal)
    }

    /// Equality that treats `1` and `1.0` as the same number
    pub fn loose_eq(&self, other: &QueryValue) -> bool {
        match (self, other) {
            (QueryValue::Int(_) | QueryValue::Double(_), QueryValue::Int(_) | QueryValue::Double(_)) => {
                self.partial_compare(other) == Some(Ordering::Equal)
            }
            _ => self == other,
        }
    }

    /// Converts to plain JSON, rendering dates as Extended JSON `{"$date": ...}`
    pub fn to_json(&self) -> Value {
        match self {
            QueryValue::Null => Value::Null,
            QueryValue::Bool(b) => Value::Bool(*b),
            QueryValue::Int(n) => Value::from(*n),
            QueryValue::Double(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            QueryValue::String(s) => Value::String(s.clone()),
            QueryValue::Date(d) => serde_json::json!({ "$date": format_date(d) }),
            QueryValue::Array(items) => Value::Array(items.iter().map(QueryValue::to_json).collect()),
            QueryValue::Document(doc) => doc.to_json(),
        }
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<Value> for QueryValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => QueryValue::Null,
            Value::Bool(b) => QueryValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => QueryValue::Int(i),
                None => QueryValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => QueryValue::String(s),
            Value::Array(items) => QueryValue::Array(items.into_iter().map(QueryValue::from).collect()),
            Value::Object(map) => QueryValue::Document(
                map.into_iter()
                    .map(|(k, v)| (k, QueryValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Document> for QueryValue {
    fn from(doc: Document) -> Self {
        QueryValue::Document(doc)
    }
}

impl From<&str> for QueryValue {
    fn from(s: &str) -> Self {
        QueryValue::String(s.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(s: String) -> Self {
        QueryValue::String(s)
    }
}

impl From<i64> for QueryValue {
    fn from(n: i64) -> Self {
        QueryValue::Int(n)
    }
}

impl From<DateTime<Utc>> for QueryValue {
    fn from(d: DateTime<Utc>) -> Self {
        QueryValue::Date(d)
    }
}

impl From<Vec<QueryValue>> for QueryValue {
    fn from(items: Vec<QueryValue>) -> Self {
        QueryValue::Array(items)
    }
}

impl Serialize for QueryValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueryValue::Null => serializer.serialize_unit(),
            QueryValue::Bool(b) => serializer.serialize_bool(*b),
            QueryValue::Int(n) => serializer.serialize_i64(*n),
            QueryValue::Double(f) => serializer.serialize_f64(*f),
            QueryValue::String(s) => serializer.serialize_str(s),
            QueryValue::Date(d) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$date", &format_date(d))?;
                map.end()
            }
            QueryValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            QueryValue::Document(doc) => doc.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for QueryValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(QueryValue::from)
    }
}

/// An insertion-ordered mapping of keys to values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    entries: Vec<(String, QueryValue)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Builds a single-entry document, the shape of a pipeline stage
    pub fn single(key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        let mut doc = Self::with_capacity(1);
        doc.insert(key, value);
        doc
    }

    /// Inserts or replaces a key, keeping the original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<QueryValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Resolves a dotted path (`address.city`) through nested documents
    pub fn get_path(&self, path: &str) -> Option<&QueryValue> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            current = match current {
                QueryValue::Document(doc) => doc.get(segment)?,
                QueryValue::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(QueryValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<QueryValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, QueryValue)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, QueryValue)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, QueryValue);
    type IntoIter = std::vec::IntoIter<(String, QueryValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
