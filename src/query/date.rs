//! # Date Coercion
//!
//! The only place untyped client input is promoted to a date. A string
//! bounded by `#` on both ends (`"#2021-05-01#"`) is a date literal; every
//! other value passes through untouched.
//!
//! When a literal matches, *all* `#` characters are stripped before parsing,
//! not just the bounding pair. This is part of the wire contract.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use super::errors::{QueryError, QueryResult};
use crate::value::QueryValue;

/// Character bounding a date literal
pub const DATE_SENTINEL: char = '#';

/// Date-time layouts accepted without an explicit offset (read as UTC)
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Calendar-date layouts (midnight UTC)
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Whether `s` uses the `#...#` date literal convention
pub fn is_date_literal(s: &str) -> bool {
    s.starts_with(DATE_SENTINEL) && s.ends_with(DATE_SENTINEL)
}

/// Rewrites a leaf value, turning date literals into dates.
///
/// A literal that fails to parse is an error rather than being passed
/// through: it means the request itself is malformed.
pub fn coerce_leaf(value: QueryValue) -> QueryResult<QueryValue> {
    match value {
        QueryValue::String(s) if is_date_literal(&s) => {
            let content: String = s.chars().filter(|c| *c != DATE_SENTINEL).collect();
            parse_date(&content)
                .map(QueryValue::Date)
                .ok_or(QueryError::InvalidDateLiteral(s))
        }
        other => Ok(other),
    }
}

/// Parses the content of a date literal.
///
/// Accepts RFC 3339 timestamps, offset-less date-times and calendar dates
/// (read as UTC), year-month (`2021-05`) and bare four-digit years.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return midnight(date);
        }
    }

    parse_partial_date(text)
}

/// `YYYY-MM` or `YYYY`
fn parse_partial_date(text: &str) -> Option<DateTime<Utc>> {
    let (year, month) = match text.split_once('-') {
        Some((year, month)) => (year, month.parse::<u32>().ok()?),
        None => (text, 1),
    };

    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(year.parse().ok()?, month, 1)?;
    midnight(date)
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}
