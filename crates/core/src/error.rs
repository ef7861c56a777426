//! Error types for tubtrack
//!
//! Only store failures, configuration problems and programmer errors are
//! errors. Expected business conditions (missing parent, non-positive
//! quantity, illegal state change, re-entrant trigger) are recorded or
//! corrected by the engine and never surface here.

use crate::types::{EntityKind, RecordId};
use std::io;
use thiserror::Error;

/// Result type alias for tubtrack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the store boundary and configuration
#[derive(Debug, Error)]
pub enum Error {
    /// Update addressed a record that does not exist
    #[error("{kind} #{id} not found")]
    NotFound {
        /// Kind of the missing record
        kind: EntityKind,
        /// Requested id
        id: RecordId,
    },

    /// Write would duplicate a declared unique field tuple
    #[error("unique constraint violated on {kind}({fields}): conflicts with #{existing}")]
    UniqueViolation {
        /// Kind the constraint is declared on
        kind: EntityKind,
        /// Comma-separated constrained fields
        fields: String,
        /// Record already holding the tuple
        existing: RecordId,
    },

    /// Conditional write found the record no longer as expected
    #[error("{kind} #{id} changed: {reason}")]
    Conflict {
        /// Kind of the record
        kind: EntityKind,
        /// Record id
        id: RecordId,
        /// What no longer holds
        reason: String,
    },

    /// Record or patch is structurally unusable
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration could not be read, parsed or validated
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error came from a unique constraint
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Error::UniqueViolation { .. })
    }

    /// Whether a conditional write was refused
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}
