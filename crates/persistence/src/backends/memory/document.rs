//! Dotted-path access to JSON documents.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

/// Returns every value reachable through `path`, descending into arrays
/// of documents along the way.
pub(crate) fn lookup<'a>(document: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![document];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                Value::Array(items) => {
                    next.extend(items.iter().filter_map(|item| item.get(segment)));
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Values a field condition is tested against: each found value, and the
/// elements of found arrays.
pub(crate) fn candidates<'a>(document: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for value in lookup(document, path) {
        out.push(value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

/// Sets `path` to `value`, creating intermediate documents.
///
/// Returns `false` if a non-document value is in the way.
pub(crate) fn set_path(document: &mut Value, path: &str, value: Value) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = document;
    while let Some(segment) = segments.next() {
        let Value::Object(map) = current else {
            return false;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return true;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    false
}

/// Removes `path`, descending into arrays of documents.
pub(crate) fn remove_path(document: &mut Value, path: &str) {
    match path.split_once('.') {
        None => match document {
            Value::Object(map) => {
                map.remove(path);
            }
            Value::Array(items) => items.iter_mut().for_each(|item| remove_path(item, path)),
            _ => {}
        },
        Some((head, rest)) => match document {
            Value::Object(map) => {
                if let Some(child) = map.get_mut(head) {
                    remove_path(child, rest);
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| remove_path(item, path)),
            _ => {}
        },
    }
}

/// Copies `path` from `source` into `target`, keeping the shape of arrays
/// of documents.
pub(crate) fn copy_path(source: &Value, target: &mut Value, path: &str) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let (Value::Object(from), Value::Object(into)) = (source, &mut *target) else {
        return;
    };
    let Some(child) = from.get(head) else {
        return;
    };
    let Some(rest) = rest else {
        into.insert(head.to_string(), child.clone());
        return;
    };

    match child {
        Value::Object(_) => {
            let slot = into
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            copy_path(child, slot, rest);
        }
        Value::Array(items) => {
            let slot = into
                .entry(head.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(projected) = slot else {
                return;
            };
            let elements: Vec<&Value> = items.iter().filter(|item| item.is_object()).collect();
            if projected.len() != elements.len() {
                *projected = vec![Value::Object(Map::new()); elements.len()];
            }
            for (item, slot) in elements.into_iter().zip(projected.iter_mut()) {
                copy_path(item, slot, rest);
            }
        }
        _ => {}
    }
}

fn as_datetime(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

/// Orders two values of the same kind. Strings holding RFC 3339 timestamps
/// are compared as instants. Values of different kinds are unordered.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => {
            match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            }
        }
        (Value::String(a), Value::String(b)) => match (as_datetime(a), as_datetime(b)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => Some(a.cmp(b)),
        },
        _ => None,
    }
}

/// Equality as a filter sees it.
pub(crate) fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(_), _)
        | (Value::Object(_), _)
        | (_, Value::Array(_))
        | (_, Value::Object(_)) => {
            a == b
        }
        _ => compare(a, b) == Some(Ordering::Equal),
    }
}

/// Total order used by `$sort`: missing and null first, then numbers,
/// strings and booleans.
pub(crate) fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }
    match (a, b) {
        (Some(a), Some(b)) if rank(Some(a)) == rank(Some(b)) => {
            compare(a, b).unwrap_or(Ordering::Equal)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}
