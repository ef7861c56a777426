//! Tub lifecycle enforcement
//!
//! [`apply`] takes the persisted tub and an incoming (already coerced) patch
//! and returns the patch that should actually be committed. Illegal state
//! changes are reverted rather than rejected, because the same patch may
//! carry other legitimate edits (cabinet moves, notes) that must still land.
//!
//! ## Rules
//!
//! 1. State: the change is checked with [`TubState::can_transition_to`]; an
//!    illegal target is replaced by the persisted state.
//! 2. Timestamps are system-owned once set: a supplied `opened_at` or
//!    `emptied_at` that differs from a persisted value is reverted.
//! 3. `opened_at` only moves while the resulting state is Opened or Emptied;
//!    `emptied_at` only while it is Emptied. Otherwise supplied values are
//!    dropped.
//! 4. Stamping: a resulting state that requires a stamp which is neither
//!    persisted nor supplied gets `now`.
//!
//! A resulting state of Override disables all of the above.

use tracing::debug;

use tubtrack_core::{fields, Patch, Record, Timestamp, TubState, Value};

/// Correct an incoming tub patch against the persisted snapshot
///
/// `current` is `None` for a tub being created; new tubs without a valid
/// state start in Hardening. Never fails.
pub fn apply(current: Option<&Record>, mut patch: Patch, now: Timestamp) -> Patch {
    let current_state = current
        .and_then(|r| r.get_str(fields::STATE))
        .and_then(|s| s.parse::<TubState>().ok());

    let state = resolve_state(current, current_state, &mut patch);
    if state == Some(TubState::Override) {
        return patch;
    }

    let opened_allowed = state.map_or(false, |s| s.requires_opened_at());
    let emptied_allowed = state == Some(TubState::Emptied);
    guard_timestamp(current, &mut patch, fields::OPENED_AT, opened_allowed, now);
    guard_timestamp(current, &mut patch, fields::EMPTIED_AT, emptied_allowed, now);
    patch
}

/// Settle the state field and return the state the tub will be in
fn resolve_state(
    current: Option<&Record>,
    current_state: Option<TubState>,
    patch: &mut Patch,
) -> Option<TubState> {
    let incoming = match patch.get(fields::STATE) {
        None => None,
        Some(value) => match value.as_str().and_then(|s| s.parse::<TubState>().ok()) {
            Some(state) => Some(state),
            None => {
                debug!(target: "tubtrack::lifecycle", value = %value, "Dropping unrecognized tub state");
                patch.remove(fields::STATE);
                None
            }
        },
    };

    match (current_state, incoming) {
        (Some(from), Some(to)) if !from.can_transition_to(to) => {
            debug!(
                target: "tubtrack::lifecycle",
                tub_id = ?current.map(|r| r.id),
                %from,
                %to,
                "Illegal transition reverted"
            );
            patch.insert(fields::STATE.to_string(), Value::from(from.as_str()));
            Some(from)
        }
        (_, Some(to)) => Some(to),
        (Some(from), None) => Some(from),
        (None, None) if current.is_none() => {
            patch.insert(
                fields::STATE.to_string(),
                Value::from(TubState::Hardening.as_str()),
            );
            Some(TubState::Hardening)
        }
        (None, None) => None,
    }
}

fn guard_timestamp(
    current: Option<&Record>,
    patch: &mut Patch,
    field: &str,
    allowed: bool,
    now: Timestamp,
) {
    let persisted = current.and_then(|r| r.get_timestamp(field));

    let rejected = patch.get(field).map_or(false, |supplied| {
        let keep = match persisted {
            Some(ts) => Timestamp::from_value(supplied) == Some(ts),
            None => allowed,
        };
        if !keep {
            debug!(target: "tubtrack::lifecycle", field, supplied = %supplied, "Supplied timestamp reverted");
        }
        !keep
    });
    if rejected {
        match persisted {
            Some(ts) => {
                patch.insert(field.to_string(), Value::from(ts));
            }
            None => {
                patch.remove(field);
            }
        }
    }

    let supplied_blank = patch.get(field).map_or(true, Value::is_blank);
    if allowed && persisted.is_none() && supplied_blank {
        patch.insert(field.to_string(), Value::from(now));
    }
}
