//! Record-level types shared by every layer
//!
//! - EntityKind: the five record kinds this core reasons about
//! - RecordId: store-assigned integer identifier
//! - Patch: field name → value map submitted to (or read from) the store
//! - Record: a committed snapshot
//! - fields: canonical field names

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::timestamp::Timestamp;
use crate::value::Value;

/// Field name → value map
///
/// Ordered so that coercion, logging and tests see fields deterministically.
pub type Patch = BTreeMap<String, Value>;

/// Entity kinds handled by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Production request that fans out into tubs
    Batch,
    /// Storage cabinet that fans out into slots
    Cabinet,
    /// Storage position inside a cabinet
    Slot,
    /// One physical tub
    Tub,
    /// Retirement request for a quantity of tubs
    Closeout,
}

impl EntityKind {
    /// All kinds, in declaration order
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Batch,
        EntityKind::Cabinet,
        EntityKind::Slot,
        EntityKind::Tub,
        EntityKind::Closeout,
    ];

    /// Lowercase name used in guard and lock keys
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Batch => "batch",
            EntityKind::Cabinet => "cabinet",
            EntityKind::Slot => "slot",
            EntityKind::Tub => "tub",
            EntityKind::Closeout => "closeout",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store-assigned record identifier
///
/// Ids are positive; zero never names a record (it is what the relation
/// resolver returns for "no relation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(u64);

impl RecordId {
    /// Wrap a raw id
    pub const fn new(raw: u64) -> Self {
        RecordId(raw)
    }

    /// Raw integer value
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Build from a resolved relation; zero (no relation) yields `None`
    pub fn from_resolved(raw: i64) -> Option<Self> {
        if raw > 0 {
            Some(RecordId(raw as u64))
        } else {
            None
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::Int(id.0 as i64)
    }
}

/// Committed record snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record id
    pub id: RecordId,
    /// Field values (never contains `id`)
    pub fields: Patch,
}

impl Record {
    /// Create a record snapshot
    pub fn new(id: RecordId, fields: Patch) -> Self {
        Record { id, fields }
    }

    /// Raw field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Integer field (Int only)
    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_int)
    }

    /// Numeric field (Int or Float)
    pub fn get_number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_number)
    }

    /// Relationship field as an id; zero or missing is `None`
    pub fn get_id(&self, field: &str) -> Option<RecordId> {
        self.get_int(field).and_then(RecordId::from_resolved)
    }

    /// String field
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Timestamp field; blank or malformed is `None`
    pub fn get_timestamp(&self, field: &str) -> Option<Timestamp> {
        self.get(field).and_then(Timestamp::from_value)
    }

    /// Whether a field is missing or blank
    pub fn is_blank(&self, field: &str) -> bool {
        self.get(field).map_or(true, Value::is_blank)
    }
}

/// Canonical field names
pub mod fields {
    /// Derived display title
    pub const TITLE: &str = "title";
    /// URL-safe form of the title
    pub const SLUG: &str = "slug";
    /// Flavor relation
    pub const FLAVOR_ID: &str = "flavor_id";
    /// Location relation
    pub const LOCATION_ID: &str = "location_id";
    /// Owning batch relation (tubs)
    pub const BATCH_ID: &str = "batch_id";
    /// Cabinet relation (tubs, slots)
    pub const CABINET_ID: &str = "cabinet_id";
    /// Use relation recorded when a closeout retires a tub
    pub const USE_ID: &str = "use_id";
    /// Tub lifecycle state
    pub const STATE: &str = "state";
    /// Set when a tub is opened
    pub const OPENED_AT: &str = "opened_at";
    /// Set when a tub is emptied
    pub const EMPTIED_AT: &str = "emptied_at";
    /// Position of a tub within its batch or a slot within its cabinet
    pub const SEQUENCE_INDEX: &str = "sequence_index";
    /// Fractional tub quantity (absent = one whole tub)
    pub const QUANTITY: &str = "quantity";
    /// Requested count on batches (float) and closeouts (integer)
    pub const REQUESTED_COUNT: &str = "requested_count";
    /// Batch publish flag bumped after fan-out
    pub const PUBLISHED: &str = "published";
    /// Cabinet slot capacity
    pub const CAPACITY: &str = "capacity";
    /// Cabinet allergen restriction flags
    pub const ALLERGEN_RESTRICTIONS: &str = "allergen_restrictions";
    /// Closeout processing marker
    pub const PROCESSED_AT: &str = "processed_at";
    /// Number of tubs a closeout actually retired
    pub const PROCESSED_COUNT: &str = "processed_count";
    /// Human-readable closeout outcome
    pub const PROCESSED_NOTE: &str = "processed_note";
}
