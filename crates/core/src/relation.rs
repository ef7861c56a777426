//! Relationship id normalization
//!
//! The CRUD layer hands relationship fields over in whatever shape its form
//! widgets produced: a bare number, a numeric string, an object carrying an
//! id, or a one-element list wrapping any of those. [`resolve`] collapses all
//! of them to a single integer, with `0` meaning "no relation".
//!
//! Resolution is shallow on purpose: one level into a list's first element
//! and one level into an object's id alias. Deeper nesting resolves to `0`.

use crate::value::Value;

/// Object keys recognized as carrying the related record's id, in lookup order
pub const ID_ALIASES: [&str; 5] = ["id", "Id", "ID", "_id", "value"];

/// Resolve a relationship value to an integer id, or `0`
///
/// Total over every `Value`: null, `false`, empty lists, negative numbers,
/// non-numeric strings and anything nested too deeply all yield `0`.
///
/// ```
/// use std::collections::BTreeMap;
/// use tubtrack_core::{relation::resolve, Value};
///
/// let mut obj = BTreeMap::new();
/// obj.insert("id".to_string(), Value::Int(7));
/// assert_eq!(resolve(&Value::Array(vec![Value::Object(obj)])), 7);
/// assert_eq!(resolve(&Value::from("12")), 12);
/// assert_eq!(resolve(&Value::Bool(false)), 0);
/// ```
pub fn resolve(value: &Value) -> i64 {
    match value {
        Value::Array(items) => match items.first() {
            Some(Value::Object(_)) => resolve_object(&items[0]),
            Some(first) => resolve_scalar(first),
            None => 0,
        },
        Value::Object(_) => resolve_object(value),
        scalar => resolve_scalar(scalar),
    }
}

fn resolve_object(value: &Value) -> i64 {
    let Some(map) = value.as_object() else {
        return 0;
    };
    ID_ALIASES
        .iter()
        .find_map(|alias| map.get(*alias))
        .map(resolve_scalar)
        .unwrap_or(0)
}

fn resolve_scalar(value: &Value) -> i64 {
    let raw = match value {
        Value::Int(i) => *i,
        Value::Float(f) if f.is_finite() => f.trunc() as i64,
        Value::String(s) => parse_numeric(s.trim()),
        _ => 0,
    };
    raw.max(0)
}

fn parse_numeric(s: &str) -> i64 {
    if let Ok(i) = s.parse::<i64>() {
        return i;
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() => f.trunc() as i64,
        _ => 0,
    }
}
