//! Closeout allocation
//!
//! A closeout asks for `requested_count` tubs of one flavor at one location to
//! be retired under a use. Processing happens once per closeout; the
//! `processed_at` marker on the closeout itself is the idempotency key.
//!
//! Eligible tubs are those in a configured closeout state (Serving or Opened
//! by default), taken oldest first: by `opened_at`, never-opened tubs last,
//! then by creation order. Each is emptied through [`Engine::commit`] so the
//! lifecycle stamps apply. A shortfall is recorded in the note, not raised.
//!
//! Two locks are taken in a fixed order: the closeout's own key, then the
//! tub pool key for its (location, flavor). The second keeps two different
//! closeouts from selecting the same tubs. Each tub is then emptied with a
//! conditional write that re-checks its state under the tub's record lock,
//! so a tub emptied by another request in between is skipped, not counted.
//!
//! `processed_at` is written before any tub is touched, with a provisional
//! note. If recording the final count fails, the closeout stays claimed and
//! a retry returns instead of selecting more tubs.

use tracing::{debug, error, info, warn};

use tubtrack_core::{
    fields, Closeout, EntityKind, EntityStore, Error, Filter, Patch, Query, Record, RecordId,
    Result, Timestamp, TubState, Value,
};

use crate::context::CommitContext;
use crate::engine::{Engine, Writer};

/// Note recorded when the request was met in full
pub const NOTE_OK: &str = "OK";

/// Note held by a claimed closeout until its result is recorded
pub const NOTE_IN_PROGRESS: &str = "Allocation in progress.";

const PROCESSED_FIELDS: [&str; 3] = [
    fields::PROCESSED_AT,
    fields::PROCESSED_COUNT,
    fields::PROCESSED_NOTE,
];

/// Remove `processed_*` fields from a client closeout patch
pub(crate) fn drop_processed_fields(current: Option<&Record>, patch: &mut Patch) {
    for field in PROCESSED_FIELDS {
        if let Some(supplied) = patch.remove(field) {
            debug!(
                target: "tubtrack::closeout",
                closeout_id = ?current.map(|r| r.id),
                field,
                %supplied,
                "Dropping client write to system-owned field"
            );
        }
    }
}

/// How a call to [`Engine::process_closeout`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseoutStatus {
    /// Tubs were allocated and the closeout marked processed by this call
    Processed,
    /// The closeout was malformed; marked processed with nothing allocated
    Rejected,
    /// A previous call already processed it; prior results are returned
    AlreadyProcessed,
    /// Nested inside this closeout's own processing; nothing done
    Busy,
    /// No closeout with that id
    NotFound,
}

/// Result of processing a closeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseoutOutcome {
    /// How the call ended
    pub status: CloseoutStatus,
    /// Tubs retired for this closeout
    pub allocated: i64,
    /// Recorded note
    pub note: String,
}

impl CloseoutOutcome {
    fn empty(status: CloseoutStatus) -> Self {
        CloseoutOutcome {
            status,
            allocated: 0,
            note: String::new(),
        }
    }
}

/// Note for an allocation of `allocated` against `requested`
pub fn allocation_note(requested: i64, allocated: i64) -> String {
    if allocated >= requested {
        NOTE_OK.to_string()
    } else {
        format!(
            "Requested {}, updated {} (not enough eligible tubs).",
            requested, allocated
        )
    }
}

fn validation_problems(closeout: &Closeout) -> Vec<&'static str> {
    let mut problems = Vec::new();
    if closeout.location_id.is_none() {
        problems.push("location");
    }
    if closeout.flavor_id.is_none() {
        problems.push("flavor");
    }
    if closeout.use_id.is_none() {
        problems.push("use");
    }
    if closeout.requested_count <= 0 {
        problems.push("requested count");
    }
    problems
}

fn check_eligible(states: &[TubState], tub_id: RecordId, current: Option<&Record>) -> Result<()> {
    let state = current
        .and_then(|r| r.get_str(fields::STATE))
        .and_then(|s| s.parse::<TubState>().ok());
    match state {
        Some(state) if states.contains(&state) && state.can_transition_to(TubState::Emptied) => {
            Ok(())
        }
        _ => Err(Error::Conflict {
            kind: EntityKind::Tub,
            id: tub_id,
            reason: format!(
                "state {} is not eligible for closeout",
                state.map_or("unset", |s| s.as_str())
            ),
        }),
    }
}

impl<S: EntityStore> Engine<S> {
    /// Process a closeout, once
    ///
    /// # Errors
    ///
    /// Store errors reading the closeout or writing its processed marker
    /// propagate. A tub that fails to update is skipped and not counted.
    pub fn process_closeout(
        &self,
        ctx: &CommitContext,
        closeout_id: RecordId,
    ) -> Result<CloseoutOutcome> {
        let key = format!("closeout:{}", closeout_id);
        ctx.guard().with_guard(
            &key,
            || self.locked(&key, || self.allocate(ctx, closeout_id)),
            Ok(CloseoutOutcome::empty(CloseoutStatus::Busy)),
        )
    }

    fn allocate(&self, ctx: &CommitContext, closeout_id: RecordId) -> Result<CloseoutOutcome> {
        let Some(record) = self.store().read(EntityKind::Closeout, closeout_id)? else {
            debug!(target: "tubtrack::closeout", %closeout_id, "Closeout not found");
            return Ok(CloseoutOutcome::empty(CloseoutStatus::NotFound));
        };
        let closeout = Closeout::from_record(&record);

        if closeout.is_processed() {
            debug!(target: "tubtrack::closeout", %closeout_id, "Already processed");
            return Ok(CloseoutOutcome {
                status: CloseoutStatus::AlreadyProcessed,
                allocated: closeout.processed_count,
                note: closeout.processed_note.unwrap_or_default(),
            });
        }

        let (flavor_id, location_id, use_id) =
            match (closeout.flavor_id, closeout.location_id, closeout.use_id) {
                (Some(flavor), Some(location), Some(use_id)) if closeout.requested_count > 0 => {
                    (flavor, location, use_id)
                }
                _ => return self.reject(ctx, &closeout),
            };
        let requested = closeout.requested_count;
        self.claim(ctx, closeout_id)?;

        // Closeouts for the same flavor and location draw from one pool of tubs
        let pool_key = format!("tubs:{}:{}", location_id, flavor_id);
        let retired = self.locked(&pool_key, || {
            self.retire_tubs(ctx, closeout_id, flavor_id, location_id, use_id, requested)
        })?;
        let allocated = retired.len() as i64;

        let note = allocation_note(requested, allocated);
        if allocated < requested {
            warn!(target: "tubtrack::closeout", %closeout_id, requested, allocated, "Closeout short of eligible tubs");
        }
        if let Err(e) = self.record_result(ctx, closeout_id, allocated, &note) {
            error!(
                target: "tubtrack::closeout",
                %closeout_id,
                allocated,
                retired = ?retired,
                error = %e,
                "Tubs retired but closeout result not recorded"
            );
            return Err(e);
        }
        info!(target: "tubtrack::closeout", %closeout_id, requested, allocated, "Closeout processed");

        Ok(CloseoutOutcome {
            status: CloseoutStatus::Processed,
            allocated,
            note,
        })
    }

    fn retire_tubs(
        &self,
        ctx: &CommitContext,
        closeout_id: RecordId,
        flavor_id: RecordId,
        location_id: RecordId,
        use_id: RecordId,
        requested: i64,
    ) -> Result<Vec<RecordId>> {
        let eligible = Query::new()
            .eq(fields::FLAVOR_ID, flavor_id)
            .eq(fields::LOCATION_ID, location_id)
            .filter(Filter::one_of(
                fields::STATE,
                self.closeout_states().iter().map(TubState::as_str),
            ))
            .order_asc(fields::OPENED_AT)
            .limit(usize::try_from(requested).unwrap_or(usize::MAX));
        let tubs = self.store().query(EntityKind::Tub, &eligible)?;

        let mut retired = Vec::new();
        for tub in tubs {
            match self.retire_tub(ctx, tub.id, use_id) {
                Ok(true) => retired.push(tub.id),
                Ok(false) => {}
                Err(e) => {
                    warn!(target: "tubtrack::closeout", %closeout_id, tub_id = %tub.id, error = %e, "Failed to empty tub, skipping");
                }
            }
        }
        Ok(retired)
    }

    /// Empty one tub under `use_id` if it is still in a closeout state
    ///
    /// Returns `false` when the tub left the eligible states since it was
    /// selected; nothing is written then.
    fn retire_tub(&self, ctx: &CommitContext, tub_id: RecordId, use_id: RecordId) -> Result<bool> {
        let mut patch = Patch::new();
        patch.insert(
            fields::STATE.to_string(),
            Value::from(TubState::Emptied.as_str()),
        );
        patch.insert(fields::USE_ID.to_string(), Value::from(use_id));

        let written = self.write(
            ctx,
            EntityKind::Tub,
            Some(tub_id),
            patch,
            Writer::Engine,
            |current| check_eligible(self.closeout_states(), tub_id, current),
        );
        match written {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => {
                debug!(target: "tubtrack::closeout", %tub_id, error = %e, "Tub no longer eligible, skipping");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn reject(&self, ctx: &CommitContext, closeout: &Closeout) -> Result<CloseoutOutcome> {
        let note = format!(
            "Invalid closeout: missing {}.",
            validation_problems(closeout).join(", ")
        );
        warn!(target: "tubtrack::closeout", closeout_id = %closeout.id, %note, "Closeout rejected");

        let mut patch = Patch::new();
        patch.insert(fields::PROCESSED_AT.to_string(), Value::from(Timestamp::now()));
        patch.insert(fields::PROCESSED_COUNT.to_string(), Value::Int(0));
        patch.insert(fields::PROCESSED_NOTE.to_string(), Value::from(note.as_str()));
        self.write_closeout(ctx, closeout.id, patch)?;

        Ok(CloseoutOutcome {
            status: CloseoutStatus::Rejected,
            allocated: 0,
            note,
        })
    }

    /// Set `processed_at` before any tub is touched
    fn claim(&self, ctx: &CommitContext, closeout_id: RecordId) -> Result<()> {
        let mut patch = Patch::new();
        patch.insert(fields::PROCESSED_AT.to_string(), Value::from(Timestamp::now()));
        patch.insert(fields::PROCESSED_COUNT.to_string(), Value::Int(0));
        patch.insert(fields::PROCESSED_NOTE.to_string(), Value::from(NOTE_IN_PROGRESS));
        self.write_closeout(ctx, closeout_id, patch)
    }

    fn record_result(
        &self,
        ctx: &CommitContext,
        closeout_id: RecordId,
        allocated: i64,
        note: &str,
    ) -> Result<()> {
        let mut patch = Patch::new();
        patch.insert(fields::PROCESSED_COUNT.to_string(), Value::Int(allocated));
        patch.insert(fields::PROCESSED_NOTE.to_string(), Value::from(note));
        self.write_closeout(ctx, closeout_id, patch)
    }

    fn write_closeout(&self, ctx: &CommitContext, closeout_id: RecordId, patch: Patch) -> Result<()> {
        self.write(
            ctx,
            EntityKind::Closeout,
            Some(closeout_id),
            patch,
            Writer::Engine,
            |_| Ok(()),
        )?;
        Ok(())
    }
}
