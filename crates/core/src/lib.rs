//! Core types and traits for tubtrack
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: Dynamic field value
//! - Timestamp: Microsecond timestamps for lifecycle stamps
//! - EntityKind / RecordId / Record / Patch: Record-level types
//! - Model views: Tub, TubState, Batch, Cabinet, Slot, Closeout
//! - Error: Error type hierarchy
//! - Traits: EntityStore, AccessPolicy
//! - relation: Relationship id normalization
//! - coerce: Field coercion before store writes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coerce;
pub mod error;
pub mod model;
pub mod relation;
pub mod timestamp;
pub mod traits;
pub mod types;
pub mod value;

pub use coerce::{coerce, coerce_patch, FieldKind};
pub use error::{Error, Result};
pub use model::{Batch, Cabinet, Closeout, Slot, Tub, TubState, UnknownState};
pub use timestamp::Timestamp;
pub use traits::{filter_patch, AccessPolicy, Direction, EntityStore, Filter, OrderBy, Query};
pub use types::{fields, EntityKind, Patch, Record, RecordId};
pub use value::Value;
