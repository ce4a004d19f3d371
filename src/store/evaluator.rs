//! Pipeline evaluation for the in-memory store
//!
//! Executes the subset of stages the bundled store understands. Anything
//! else is reported as unsupported rather than silently skipped, so a
//! compiled pipeline is either run completely or not at all.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};

use super::errors::{StoreError, StoreResult};
use crate::value::{Document, QueryValue};

/// Runs every stage of `pipeline` over `docs`, in order
pub fn run_pipeline(docs: Vec<Document>, pipeline: &[Document]) -> StoreResult<Vec<Document>> {
    let mut docs = docs;
    for stage in pipeline {
        docs = apply_stage(docs, stage)?;
    }
    Ok(docs)
}

fn apply_stage(docs: Vec<Document>, stage: &Document) -> StoreResult<Vec<Document>> {
    let mut entries = stage.iter();
    let (name, arg) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(StoreError::InvalidPipeline(
                "each stage must have exactly one key".to_string(),
            ))
        }
    };

    match name {
        "$match" => {
            let filter = arg
                .as_document()
                .ok_or_else(|| invalid(name, "expects a document"))?;
            let mut kept = Vec::with_capacity(docs.len());
            for doc in docs {
                if matches_filter(&doc, filter)? {
                    kept.push(doc);
                }
            }
            Ok(kept)
        }
        "$limit" => {
            let n = count_arg(name, arg)?;
            if n == 0 {
                return Err(invalid(name, "must be positive"));
            }
            let mut docs = docs;
            docs.truncate(n);
            Ok(docs)
        }
        "$skip" => {
            let n = count_arg(name, arg)?;
            Ok(docs.into_iter().skip(n).collect())
        }
        "$sort" => sort(docs, arg),
        "$project" => project(docs, arg),
        "$unset" => unset(docs, arg),
        "$count" => {
            let field = arg
                .as_str()
                .filter(|f| !f.is_empty() && !f.starts_with('$') && !f.contains('.'))
                .ok_or_else(|| invalid(name, "expects a plain field name"))?;
            Ok(vec![Document::single(field, docs.len() as i64)])
        }
        other => Err(StoreError::Unsupported(format!("stage {}", other))),
    }
}

fn invalid(stage: &str, reason: &str) -> StoreError {
    StoreError::InvalidPipeline(format!("{} {}", stage, reason))
}

fn count_arg(stage: &str, arg: &QueryValue) -> StoreResult<usize> {
    arg.as_i64()
        .filter(|n| *n >= 0)
        .map(|n| n as usize)
        .ok_or_else(|| invalid(stage, "expects a non-negative integer"))
}

/// Checks a document against a `$match` filter
pub fn matches_filter(doc: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter.iter() {
        let matched = match key {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches_filter(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(doc, key, condition)?,
            "$nor" => !any_clause(doc, key, condition)?,
            op if op.starts_with('$') => {
                return Err(StoreError::Unsupported(format!("operator {}", op)))
            }
            field => matches_field(doc.get_path(field), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Checks that `filter` can be evaluated by [`matches_filter`].
///
/// Every branch is walked, so operand shapes and `$regex` patterns are
/// checked even where no document would reach them.
pub fn validate_filter(filter: &Document) -> StoreResult<()> {
    for (key, condition) in filter.iter() {
        match key {
            "$and" | "$or" | "$nor" => {
                for clause in clauses(key, condition)? {
                    validate_filter(clause)?;
                }
            }
            op if op.starts_with('$') => {
                return Err(StoreError::Unsupported(format!("operator {}", op)))
            }
            _ => validate_condition(condition)?,
        }
    }
    Ok(())
}

fn validate_condition(condition: &QueryValue) -> StoreResult<()> {
    let ops = match condition {
        QueryValue::Document(ops) if is_operator_document(ops) => ops,
        _ => return Ok(()),
    };

    for (op, operand) in ops.iter() {
        match op {
            "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$exists" => {}
            "$options" => {
                operand
                    .as_str()
                    .ok_or_else(|| invalid(op, "expects a string"))?;
            }
            "$in" | "$nin" => {
                operand
                    .as_array()
                    .ok_or_else(|| invalid(op, "expects an array"))?;
            }
            "$regex" => {
                build_regex(operand, ops.get_str("$options").unwrap_or(""))?;
            }
            "$not" => match operand {
                QueryValue::Document(inner) if is_operator_document(inner) => {
                    validate_condition(operand)?
                }
                _ => return Err(invalid(op, "expects an operator document")),
            },
            other => return Err(StoreError::Unsupported(format!("operator {}", other))),
        }
    }
    Ok(())
}

fn clauses<'a>(op: &str, condition: &'a QueryValue) -> StoreResult<Vec<&'a Document>> {
    let items = condition
        .as_array()
        .ok_or_else(|| invalid(op, "expects an array"))?;
    items
        .iter()
        .map(|item| item.as_document().ok_or_else(|| invalid(op, "expects documents")))
        .collect()
}

fn any_clause(doc: &Document, op: &str, condition: &QueryValue) -> StoreResult<bool> {
    for clause in clauses(op, condition)? {
        if matches_filter(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

fn matches_field(actual: Option<&QueryValue>, condition: &QueryValue) -> StoreResult<bool> {
    match condition {
        QueryValue::Document(ops) if is_operator_document(ops) => {
            for (op, operand) in ops.iter() {
                if op == "$options" {
                    continue;
                }
                if !apply_operator(actual, op, operand, ops)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        expected => Ok(equals(actual, expected)),
    }
}

fn apply_operator(
    actual: Option<&QueryValue>,
    op: &str,
    operand: &QueryValue,
    siblings: &Document,
) -> StoreResult<bool> {
    let result = match op {
        "$eq" => equals(actual, operand),
        "$ne" => !equals(actual, operand),
        "$gt" => compare(actual, operand, |o| o == Ordering::Greater),
        "$gte" => compare(actual, operand, |o| o != Ordering::Less),
        "$lt" => compare(actual, operand, |o| o == Ordering::Less),
        "$lte" => compare(actual, operand, |o| o != Ordering::Greater),
        "$in" => in_list(actual, op, operand)?,
        "$nin" => !in_list(actual, op, operand)?,
        "$exists" => actual.is_some() == operand.is_truthy(),
        "$regex" => {
            let options = siblings.get_str("$options").unwrap_or("");
            regex_match(actual, operand, options)?
        }
        "$not" => match operand {
            QueryValue::Document(inner) if is_operator_document(inner) => {
                !matches_field(actual, operand)?
            }
            _ => return Err(invalid(op, "expects an operator document")),
        },
        other => return Err(StoreError::Unsupported(format!("operator {}", other))),
    };
    Ok(result)
}

/// Equality with array-contains semantics; a missing field equals null
fn equals(actual: Option<&QueryValue>, expected: &QueryValue) -> bool {
    match actual {
        None => expected.is_null(),
        Some(QueryValue::Array(items)) => {
            items.iter().any(|item| item.loose_eq(expected))
                || (matches!(expected, QueryValue::Array(_)) && actual == Some(expected))
        }
        Some(value) => value.loose_eq(expected),
    }
}

fn compare(actual: Option<&QueryValue>, bound: &QueryValue, accept: fn(Ordering) -> bool) -> bool {
    match actual {
        None => false,
        Some(QueryValue::Array(items)) => items
            .iter()
            .any(|item| item.partial_compare(bound).map_or(false, accept)),
        Some(value) => value.partial_compare(bound).map_or(false, accept),
    }
}

fn in_list(actual: Option<&QueryValue>, op: &str, operand: &QueryValue) -> StoreResult<bool> {
    let candidates = operand
        .as_array()
        .ok_or_else(|| invalid(op, "expects an array"))?;
    Ok(candidates.iter().any(|candidate| equals(actual, candidate)))
}

/// Compiles a `$regex` operand. The error never echoes the pattern.
fn build_regex(pattern: &QueryValue, options: &str) -> StoreResult<Regex> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| invalid("$regex", "expects a string pattern"))?;
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .build()
        .map_err(|_| invalid("$regex", "pattern does not compile"))
}

fn regex_match(actual: Option<&QueryValue>, pattern: &QueryValue, options: &str) -> StoreResult<bool> {
    let regex = build_regex(pattern, options)?;

    Ok(match actual {
        Some(QueryValue::String(s)) => regex.is_match(s),
        Some(QueryValue::Array(items)) => items
            .iter()
            .filter_map(QueryValue::as_str)
            .any(|s| regex.is_match(s)),
        _ => false,
    })
}

fn sort(mut docs: Vec<Document>, spec: &QueryValue) -> StoreResult<Vec<Document>> {
    let spec = spec
        .as_document()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| invalid("$sort", "expects a non-empty document"))?;

    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec.iter() {
        let ascending = match direction.as_i64() {
            Some(1) => true,
            Some(-1) => false,
            _ => return Err(invalid("$sort", "directions must be 1 or -1")),
        };
        keys.push((field, ascending));
    }

    docs.sort_by(|a, b| {
        for (field, ascending) in &keys {
            let ordering = compare_optional(a.get_path(field), b.get_path(field));
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

/// Missing fields sort like null
fn compare_optional(a: Option<&QueryValue>, b: Option<&QueryValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(v)) if v.is_null() => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(v), None) if v.is_null() => Ordering::Equal,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.sort_compare(b),
    }
}

fn project(docs: Vec<Document>, spec: &QueryValue) -> StoreResult<Vec<Document>> {
    let spec = spec
        .as_document()
        .ok_or_else(|| invalid("$project", "expects a document"))?;

    let mut include_id = true;
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (field, flag) in spec.iter() {
        if !matches!(flag, QueryValue::Bool(_) | QueryValue::Int(_) | QueryValue::Double(_)) {
            return Err(StoreError::Unsupported("computed projections".to_string()));
        }
        if field.contains('.') {
            return Err(StoreError::Unsupported("nested projections".to_string()));
        }
        if field == "_id" {
            include_id = flag.is_truthy();
        } else if flag.is_truthy() {
            included.push(field);
        } else {
            excluded.push(field);
        }
    }

    if !included.is_empty() && !excluded.is_empty() {
        return Err(invalid("$project", "cannot mix inclusion and exclusion"));
    }

    let projected: Vec<Document> = docs
        .into_iter()
        .map(|doc| {
            if included.is_empty() {
                doc.into_iter()
                    .filter(|(k, _)| !(excluded.contains(&k.as_str()) || (k == "_id" && !include_id)))
                    .collect::<Document>()
            } else {
                doc.into_iter()
                    .filter(|(k, _)| included.contains(&k.as_str()) || (k == "_id" && include_id))
                    .collect::<Document>()
            }
        })
        .collect();
    Ok(projected)
}

fn unset(docs: Vec<Document>, spec: &QueryValue) -> StoreResult<Vec<Document>> {
    let fields: Vec<&str> = match spec {
        QueryValue::String(field) => vec![field.as_str()],
        QueryValue::Array(items) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(|| invalid("$unset", "expects field names")))
            .collect::<StoreResult<_>>()?,
        _ => return Err(invalid("$unset", "expects a field name or an array of them")),
    };

    Ok(docs
        .into_iter()
        .map(|mut doc| {
            for field in &fields {
                doc.remove(field);
            }
            doc
        })
        .collect())
}
