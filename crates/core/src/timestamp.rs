//! Microsecond-precision timestamp type
//!
//! Lifecycle stamps (`opened_at`, `emptied_at`) and closeout processing
//! markers (`processed_at`) are stored as microseconds since Unix epoch in a
//! `Value::Int`. This type is the only place that arithmetic happens.
//!
//! ```
//! use tubtrack_core::Timestamp;
//!
//! let now = Timestamp::now();
//! let from_secs = Timestamp::from_secs(1000);
//! assert!(now > from_secs);
//! ```

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;

/// Microsecond-precision timestamp
///
/// ## Invariants
///
/// - Timestamps are always non-negative
/// - Timestamps are always in microseconds
/// - The zero timestamp represents Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Unix epoch (1970-01-01 00:00:00 UTC)
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Create a timestamp for the current moment
    ///
    /// Returns epoch if the system clock is before Unix epoch.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as u64)
    }

    /// Create a timestamp from microseconds since epoch
    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// Create a timestamp from seconds since epoch
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    /// Get microseconds since Unix epoch
    #[inline]
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get seconds since Unix epoch (truncates)
    #[inline]
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Read a stored timestamp field
    ///
    /// Accepts `Int` micros and numeric strings; anything else (including
    /// negative numbers) is treated as unset.
    pub fn from_value(value: &Value) -> Option<Timestamp> {
        match value {
            Value::Int(i) if *i >= 0 => Some(Timestamp(*i as u64)),
            Value::String(s) => s.trim().parse::<u64>().ok().map(Timestamp),
            _ => None,
        }
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::Int(ts.0.min(i64::MAX as u64) as i64)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.0)
    }
}
