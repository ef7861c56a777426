//! Field coercion before store writes
//!
//! Every patch is passed through [`coerce_patch`] immediately before it is
//! written, so the store never receives untyped strings for numeric or
//! relationship fields. The field → kind table is static and built once.
//! Fields not in the table pass through unchanged.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::model::TubState;
use crate::relation;
use crate::timestamp::Timestamp;
use crate::types::{fields, EntityKind, Patch};
use crate::value::Value;

/// How a field's raw value is coerced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Tub state, stored as its canonical name
    State,
    /// Relationship, id or ordering field, stored as `Int`
    Integer,
    /// Quantity field, stored as `Float`
    Float,
    /// Microsecond timestamp, stored as `Int`
    Timestamp,
    /// Flag, stored as `Bool`
    Flag,
}

static FIELD_KINDS: Lazy<HashMap<(EntityKind, &'static str), FieldKind>> = Lazy::new(|| {
    use EntityKind::*;
    use FieldKind::*;

    let table: &[(EntityKind, &'static str, FieldKind)] = &[
        (Batch, fields::FLAVOR_ID, Integer),
        (Batch, fields::LOCATION_ID, Integer),
        (Batch, fields::REQUESTED_COUNT, Float),
        (Batch, fields::PUBLISHED, Flag),
        (Cabinet, fields::LOCATION_ID, Integer),
        (Cabinet, fields::CAPACITY, Integer),
        (Slot, fields::CABINET_ID, Integer),
        (Slot, fields::LOCATION_ID, Integer),
        (Slot, fields::SEQUENCE_INDEX, Integer),
        (Tub, fields::FLAVOR_ID, Integer),
        (Tub, fields::BATCH_ID, Integer),
        (Tub, fields::LOCATION_ID, Integer),
        (Tub, fields::CABINET_ID, Integer),
        (Tub, fields::USE_ID, Integer),
        (Tub, fields::SEQUENCE_INDEX, Integer),
        (Tub, fields::STATE, State),
        (Tub, fields::OPENED_AT, FieldKind::Timestamp),
        (Tub, fields::EMPTIED_AT, FieldKind::Timestamp),
        (Tub, fields::QUANTITY, Float),
        (Closeout, fields::LOCATION_ID, Integer),
        (Closeout, fields::FLAVOR_ID, Integer),
        (Closeout, fields::USE_ID, Integer),
        (Closeout, fields::REQUESTED_COUNT, Integer),
        (Closeout, fields::PROCESSED_AT, FieldKind::Timestamp),
        (Closeout, fields::PROCESSED_COUNT, Integer),
    ];

    table
        .iter()
        .map(|(kind, field, coercion)| ((*kind, *field), *coercion))
        .collect()
});

/// Look up the coercion for a field, if it has one
pub fn field_kind(kind: EntityKind, field: &str) -> Option<FieldKind> {
    FIELD_KINDS.get(&(kind, field)).copied()
}

/// Coerce one raw field value
pub fn coerce(kind: EntityKind, field: &str, raw: Value) -> Value {
    match field_kind(kind, field) {
        Some(FieldKind::State) => coerce_state(raw),
        Some(FieldKind::Integer) => Value::Int(relation::resolve(&raw)),
        Some(FieldKind::Float) => coerce_float(raw),
        Some(FieldKind::Timestamp) => coerce_timestamp(raw),
        Some(FieldKind::Flag) => coerce_flag(raw),
        None => raw,
    }
}

/// Coerce every field of a patch
pub fn coerce_patch(kind: EntityKind, patch: Patch) -> Patch {
    patch
        .into_iter()
        .map(|(field, raw)| {
            let value = coerce(kind, &field, raw);
            (field, value)
        })
        .collect()
}

fn coerce_state(raw: Value) -> Value {
    match raw {
        Value::String(s) => match s.parse::<TubState>() {
            Ok(state) => Value::from(state.as_str()),
            Err(_) => Value::String(s.trim().to_string()),
        },
        _ => Value::Null,
    }
}

fn coerce_float(raw: Value) -> Value {
    match raw {
        Value::Float(f) if f.is_finite() => Value::Float(f),
        Value::Int(i) => Value::Float(i as f64),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn coerce_timestamp(raw: Value) -> Value {
    if raw.is_blank() {
        return Value::Null;
    }
    Timestamp::from_value(&raw)
        .map(Value::from)
        .unwrap_or(Value::Null)
}

fn coerce_flag(raw: Value) -> Value {
    let flag = match &raw {
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        _ => false,
    };
    Value::Bool(flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_state_is_canonicalized() {
        assert_eq!(
            coerce(EntityKind::Tub, fields::STATE, Value::from(" opened")),
            Value::from("Opened")
        );
        assert_eq!(
            coerce(EntityKind::Tub, fields::STATE, Value::from("melted ")),
            Value::from("melted")
        );
    }

    #[test]
    fn test_non_string_state_is_null() {
        assert_eq!(
            coerce(EntityKind::Tub, fields::STATE, Value::Int(4)),
            Value::Null
        );
    }

    #[test]
    fn test_relationship_fields_become_ints() {
        let mut obj = BTreeMap::new();
        obj.insert("id".to_string(), Value::from("5"));
        assert_eq!(
            coerce(EntityKind::Tub, fields::BATCH_ID, Value::Object(obj)),
            Value::Int(5)
        );
        assert_eq!(
            coerce(EntityKind::Slot, fields::SEQUENCE_INDEX, Value::from("3")),
            Value::Int(3)
        );
        assert_eq!(
            coerce(EntityKind::Tub, fields::CABINET_ID, Value::Null),
            Value::Int(0)
        );
    }

    #[test]
    fn test_requested_count_depends_on_kind() {
        assert_eq!(
            coerce(EntityKind::Batch, fields::REQUESTED_COUNT, Value::from("3.5")),
            Value::Float(3.5)
        );
        assert_eq!(
            coerce(EntityKind::Closeout, fields::REQUESTED_COUNT, Value::from("10")),
            Value::Int(10)
        );
    }

    #[test]
    fn test_float_garbage_is_null() {
        assert_eq!(
            coerce(EntityKind::Tub, fields::QUANTITY, Value::from("half")),
            Value::Null
        );
        assert_eq!(
            coerce(EntityKind::Tub, fields::QUANTITY, Value::Int(1)),
            Value::Float(1.0)
        );
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(
            coerce(EntityKind::Tub, fields::OPENED_AT, Value::from("")),
            Value::Null
        );
        assert_eq!(
            coerce(EntityKind::Tub, fields::OPENED_AT, Value::from("1500")),
            Value::Int(1500)
        );
    }

    #[test]
    fn test_flags() {
        assert_eq!(
            coerce(EntityKind::Batch, fields::PUBLISHED, Value::from("yes")),
            Value::Bool(true)
        );
        assert_eq!(
            coerce(EntityKind::Batch, fields::PUBLISHED, Value::Int(0)),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let raw = Value::from("Mint chip, 4 tubs");
        assert_eq!(coerce(EntityKind::Batch, fields::TITLE, raw.clone()), raw);
        assert_eq!(coerce(EntityKind::Batch, fields::STATE, raw.clone()), raw);
    }

    #[test]
    fn test_coerce_patch() {
        let mut patch = Patch::new();
        patch.insert(fields::FLAVOR_ID.into(), Value::from("2"));
        patch.insert(fields::STATE.into(), Value::from("serving"));
        patch.insert("note".into(), Value::from("x"));
        let out = coerce_patch(EntityKind::Tub, patch);
        assert_eq!(out[fields::FLAVOR_ID], Value::Int(2));
        assert_eq!(out[fields::STATE], Value::from("Serving"));
        assert_eq!(out["note"], Value::from("x"));
    }
}
