//! In-process evaluation of filter and update documents.

use regex::RegexBuilder;
use serde_json::{Map, Value};

use crate::error::{BackendError, StorageResult};

use super::document::{candidates, compare, equals, lookup, remove_path, set_path};

fn unsupported(operator: &str) -> BackendError {
    BackendError::QueryError {
        message: format!("unsupported operator {operator}"),
    }
}

fn malformed(operator: &str, message: &str) -> BackendError {
    BackendError::QueryError {
        message: format!("{operator}: {message}"),
    }
}

/// Returns `true` if `document` satisfies `filter`.
pub(crate) fn matches(document: &Value, filter: &Value) -> StorageResult<bool> {
    let Value::Object(filter) = filter else {
        return Err(malformed("filter", "expected a document").into());
    };
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => return Err(unsupported(op).into()),
            path => field_matches(document, path, condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(operator: &str, value: &'a Value) -> StorageResult<&'a [Value]> {
    match value {
        Value::Array(items) if !items.is_empty() => Ok(items),
        _ => Err(malformed(operator, "expected a non-empty array").into()),
    }
}

fn is_operator_document(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
            Some(map)
        }
        _ => None,
    }
}

fn field_matches(document: &Value, path: &str, condition: &Value) -> StorageResult<bool> {
    match is_operator_document(condition) {
        Some(operators) => operators_match(document, path, operators),
        None => Ok(eq(document, path, condition)),
    }
}

fn eq(document: &Value, path: &str, expected: &Value) -> bool {
    let found = candidates(document, path);
    if found.is_empty() {
        return expected.is_null();
    }
    found.iter().any(|value| equals(value, expected))
}

fn operators_match(
    document: &Value,
    path: &str,
    operators: &Map<String, Value>,
) -> StorageResult<bool> {
    let options = operators.get("$options").and_then(Value::as_str).unwrap_or("");
    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => eq(document, path, operand),
            "$ne" => !eq(document, path, operand),
            "$gt" | "$gte" | "$lt" | "$lte" => {
                candidates(document, path)
                    .into_iter()
                    .any(|value| ordered(operator, value, operand))
            }
            "$in" => set(operator, operand)?
                .iter()
                .any(|expected| eq(document, path, expected)),
            "$nin" => !set(operator, operand)?
                .iter()
                .any(|expected| eq(document, path, expected)),
            "$regex" => {
                let Some(pattern) = operand.as_str() else {
                    return Err(malformed(operator, "expected a string pattern").into());
                };
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(options.contains('i'))
                    .multi_line(options.contains('m'))
                    .build()
                    .map_err(|e| malformed(operator, &e.to_string()))?;
                candidates(document, path)
                    .into_iter()
                    .filter_map(Value::as_str)
                    .any(|s| regex.is_match(s))
            }
            "$options" => true,
            "$exists" => {
                let wanted = operand.as_bool().unwrap_or(true);
                !lookup(document, path).is_empty() == wanted
            }
            "$elemMatch" => elem_match(document, path, operand)?,
            other => return Err(unsupported(other).into()),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn ordered(operator: &str, value: &Value, operand: &Value) -> bool {
    let Some(ordering) = compare(value, operand) else {
        return false;
    };
    match operator {
        "$gt" => ordering.is_gt(),
        "$gte" => ordering.is_ge(),
        "$lt" => ordering.is_lt(),
        _ => ordering.is_le(),
    }
}

fn set<'a>(operator: &str, operand: &'a Value) -> StorageResult<&'a [Value]> {
    operand
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| malformed(operator, "expected an array").into())
}

/// `$elemMatch` against every array found at `path`. An operator-only
/// condition applies to the element itself; anything else is a filter over
/// the element's fields.
fn elem_match(document: &Value, path: &str, condition: &Value) -> StorageResult<bool> {
    for found in lookup(document, path) {
        let Value::Array(items) = found else {
            continue;
        };
        for item in items {
            let hit = match is_operator_document(condition) {
                Some(operators) => {
                    let wrapped = serde_json::json!({ "v": item });
                    operators_match(&wrapped, "v", operators)?
                }
                None => item.is_object() && matches(item, condition)?,
            };
            if hit {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Applies a `$set` / `$unset` update document in place.
pub(crate) fn apply_update(document: &mut Value, update: &Value) -> StorageResult<()> {
    let Value::Object(update) = update else {
        return Err(malformed("update", "expected a document").into());
    };
    for (operator, fields) in update {
        let Value::Object(fields) = fields else {
            return Err(malformed(operator, "expected a document").into());
        };
        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    if !set_path(document, path, value.clone()) {
                        return Err(malformed(operator, "path crosses a non-document value").into());
                    }
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    remove_path(document, path);
                }
            }
            other => return Err(unsupported(other).into()),
        }
    }
    Ok(())
}
