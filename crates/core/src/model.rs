//! Typed views over inventory records
//!
//! The store speaks [`Record`]s; workflows read them through these views.
//! Views are lenient: a missing or malformed field becomes `None`/zero
//! rather than an error, and the workflow decides what that means.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::timestamp::Timestamp;
use crate::types::{fields, Record, RecordId};

// ========== TubState ==========

/// Tub lifecycle state
///
/// ```text
/// Hardening/Freezing/Tempering/Serving ──▶ anything
/// Opened ──▶ Opened | Emptied
/// Emptied ──▶ (terminal)
/// Override: escape hatch, suspends enforcement
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TubState {
    /// Freshly produced, hardening
    Hardening,
    /// In the freezer
    Freezing,
    /// Warming up to serving temperature
    Tempering,
    /// In a display slot, sellable, not yet opened
    Serving,
    /// Opened for scooping
    Opened,
    /// Used up (terminal)
    Emptied,
    /// Escape hatch: lifecycle rules are not enforced
    Override,
}

impl TubState {
    /// All states, in lifecycle order
    pub const ALL: [TubState; 7] = [
        TubState::Hardening,
        TubState::Freezing,
        TubState::Tempering,
        TubState::Serving,
        TubState::Opened,
        TubState::Emptied,
        TubState::Override,
    ];

    /// Check if this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TubState::Emptied)
    }

    /// Check if transition from current to target is allowed
    ///
    /// ## Allowed Transitions
    /// - Emptied: terminal (only itself)
    /// - Opened: itself or Emptied
    /// - Everything else: anywhere
    /// - Override as a target is always allowed
    pub fn can_transition_to(&self, target: TubState) -> bool {
        match (self, target) {
            (_, TubState::Override) => true,
            (current, target) if *current == target => true,
            (TubState::Emptied, _) => false,
            (TubState::Opened, TubState::Emptied) => true,
            (TubState::Opened, _) => false,
            _ => true,
        }
    }

    /// Whether `opened_at` must be set in this state
    pub fn requires_opened_at(&self) -> bool {
        matches!(self, TubState::Opened | TubState::Emptied)
    }

    /// Canonical string form stored in the `state` field
    pub fn as_str(&self) -> &'static str {
        match self {
            TubState::Hardening => "Hardening",
            TubState::Freezing => "Freezing",
            TubState::Tempering => "Tempering",
            TubState::Serving => "Serving",
            TubState::Opened => "Opened",
            TubState::Emptied => "Emptied",
            TubState::Override => "Override",
        }
    }
}

impl fmt::Display for TubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized tub state string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tub state '{}'", self.0)
    }
}

impl std::error::Error for UnknownState {}

impl FromStr for TubState {
    type Err = UnknownState;

    /// Case-insensitive, whitespace-trimmed parse
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        TubState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

// ========== Views ==========

/// Tub view
#[derive(Debug, Clone, PartialEq)]
pub struct Tub {
    /// Record id
    pub id: RecordId,
    /// Flavor relation
    pub flavor_id: Option<RecordId>,
    /// Owning batch
    pub batch_id: Option<RecordId>,
    /// Location relation
    pub location_id: Option<RecordId>,
    /// Cabinet the tub sits in, if any
    pub cabinet_id: Option<RecordId>,
    /// Lifecycle state; `None` when missing or unparseable
    pub state: Option<TubState>,
    /// When the tub was opened
    pub opened_at: Option<Timestamp>,
    /// When the tub was emptied
    pub emptied_at: Option<Timestamp>,
    /// Position within the batch
    pub sequence_index: i64,
    /// Fractional quantity; `None` means one whole tub
    pub quantity: Option<f64>,
}

impl Tub {
    /// Read a tub view from a record
    pub fn from_record(record: &Record) -> Self {
        Tub {
            id: record.id,
            flavor_id: record.get_id(fields::FLAVOR_ID),
            batch_id: record.get_id(fields::BATCH_ID),
            location_id: record.get_id(fields::LOCATION_ID),
            cabinet_id: record.get_id(fields::CABINET_ID),
            state: record
                .get_str(fields::STATE)
                .and_then(|s| s.parse().ok()),
            opened_at: record.get_timestamp(fields::OPENED_AT),
            emptied_at: record.get_timestamp(fields::EMPTIED_AT),
            sequence_index: record.get_int(fields::SEQUENCE_INDEX).unwrap_or(0),
            quantity: record.get_number(fields::QUANTITY),
        }
    }
}

/// Batch view
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Record id
    pub id: RecordId,
    /// Flavor produced
    pub flavor_id: Option<RecordId>,
    /// Where the tubs are produced
    pub location_id: Option<RecordId>,
    /// Requested tub count, possibly fractional
    pub requested_count: f64,
    /// Whether fan-out has completed
    pub published: bool,
}

impl Batch {
    /// Read a batch view from a record
    pub fn from_record(record: &Record) -> Self {
        Batch {
            id: record.id,
            flavor_id: record.get_id(fields::FLAVOR_ID),
            location_id: record.get_id(fields::LOCATION_ID),
            requested_count: record
                .get_number(fields::REQUESTED_COUNT)
                .filter(|n| n.is_finite())
                .unwrap_or(0.0),
            published: record
                .get(fields::PUBLISHED)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }
}

/// Cabinet view
#[derive(Debug, Clone, PartialEq)]
pub struct Cabinet {
    /// Record id
    pub id: RecordId,
    /// Where the cabinet stands
    pub location_id: Option<RecordId>,
    /// Number of slots ("max slots")
    pub capacity: i64,
    /// Allergen restriction flags
    pub allergen_restrictions: Vec<String>,
}

impl Cabinet {
    /// Read a cabinet view from a record
    pub fn from_record(record: &Record) -> Self {
        let allergen_restrictions = record
            .get(fields::ALLERGEN_RESTRICTIONS)
            .and_then(|v| v.as_array())
            .map(|flags| {
                flags
                    .iter()
                    .filter_map(|f| f.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Cabinet {
            id: record.id,
            location_id: record.get_id(fields::LOCATION_ID),
            capacity: record.get_int(fields::CAPACITY).unwrap_or(0),
            allergen_restrictions,
        }
    }
}

/// Slot view
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Record id
    pub id: RecordId,
    /// Owning cabinet
    pub cabinet_id: Option<RecordId>,
    /// Location inherited from the cabinet
    pub location_id: Option<RecordId>,
    /// Position within the cabinet
    pub sequence_index: i64,
}

impl Slot {
    /// Read a slot view from a record
    pub fn from_record(record: &Record) -> Self {
        Slot {
            id: record.id,
            cabinet_id: record.get_id(fields::CABINET_ID),
            location_id: record.get_id(fields::LOCATION_ID),
            sequence_index: record.get_int(fields::SEQUENCE_INDEX).unwrap_or(0),
        }
    }
}

/// Closeout view
#[derive(Debug, Clone, PartialEq)]
pub struct Closeout {
    /// Record id
    pub id: RecordId,
    /// Location to retire tubs from
    pub location_id: Option<RecordId>,
    /// Flavor to retire
    pub flavor_id: Option<RecordId>,
    /// Use recorded on each retired tub
    pub use_id: Option<RecordId>,
    /// Number of tubs requested
    pub requested_count: i64,
    /// Set once processing has happened
    pub processed_at: Option<Timestamp>,
    /// Number of tubs actually retired
    pub processed_count: i64,
    /// Outcome note
    pub processed_note: Option<String>,
}

impl Closeout {
    /// Read a closeout view from a record
    pub fn from_record(record: &Record) -> Self {
        Closeout {
            id: record.id,
            location_id: record.get_id(fields::LOCATION_ID),
            flavor_id: record.get_id(fields::FLAVOR_ID),
            use_id: record.get_id(fields::USE_ID),
            requested_count: record.get_int(fields::REQUESTED_COUNT).unwrap_or(0),
            processed_at: record.get_timestamp(fields::PROCESSED_AT),
            processed_count: record.get_int(fields::PROCESSED_COUNT).unwrap_or(0),
            processed_note: record.get_str(fields::PROCESSED_NOTE).map(str::to_string),
        }
    }

    /// Whether the processing marker is set
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}
