//! Engine: the commit path and its hooks
//!
//! Every write, whether it comes from the CRUD layer or from a workflow,
//! goes through [`Engine::commit`]:
//!
//! ```text
//! 1. read current snapshot (updates only)
//! 2. before_commit(): coerce fields, correct tub lifecycle, derive titles
//! 3. store.upsert()
//! 4. after_commit(): emit CommitEvent, dispatch to the kind's workflow
//! ```
//!
//! Steps 1 to 3 of an update run under the advisory lock for that record,
//! so two engine commits to one record never interleave their read and
//! write. Step 4 runs after the lock is released.
//!
//! Workflow writes re-enter step 4, which is how a batch publish triggers
//! batch fan-out again. That nested trigger is stopped at the workflow
//! boundary by the request's re-entrancy guard, never by the store.
//!
//! Closeout `processed_*` fields belong to the allocator. Client patches
//! never write them; the allocator writes them as `Writer::Engine`.
//!
//! A persistence layer that owns its own write path can skip `commit` and
//! call `before_commit` / `after_commit` around its writes instead.

use std::sync::Arc;

use tracing::{debug, warn};

use tubtrack_concurrency::KeyedLocks;
use tubtrack_core::{
    coerce_patch, EntityKind, EntityStore, Patch, Record, RecordId, Result, Timestamp, TubState,
};

use crate::config::EngineConfig;
use crate::context::{CommitContext, CommitEvent};
use crate::{closeout, lifecycle, titles};

/// Origin of a write, deciding who may set system-owned fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Writer {
    /// CRUD layer or embedder
    Client,
    /// The engine's own workflows
    Engine,
}

fn record_key(kind: EntityKind, id: RecordId) -> String {
    format!("record:{}:{}", kind, id)
}

/// Inventory consistency engine over an entity store
pub struct Engine<S: EntityStore> {
    store: Arc<S>,
    locks: KeyedLocks,
    config: EngineConfig,
    closeout_states: Vec<TubState>,
}

impl<S: EntityStore> Engine<S> {
    /// Engine with the default configuration
    pub fn new(store: Arc<S>) -> Self {
        let config = EngineConfig::default();
        Engine {
            store,
            locks: KeyedLocks::new(),
            closeout_states: vec![TubState::Serving, TubState::Opened],
            config,
        }
    }

    /// Engine with an explicit configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration does not validate.
    pub fn with_config(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        let closeout_states = config.closeout_states()?;
        Ok(Engine {
            store,
            locks: KeyedLocks::new(),
            config,
            closeout_states,
        })
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn closeout_states(&self) -> &[TubState] {
        &self.closeout_states
    }

    /// Run `f` under the advisory lock for `key`, if enabled
    pub(crate) fn locked<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        if self.config.advisory_locks {
            self.locks.with_lock(key, f)
        } else {
            f()
        }
    }

    /// Commit a patch through hooks and store
    ///
    /// `id = None` creates a record. Returns the committed record's id.
    ///
    /// # Errors
    ///
    /// Store failures propagate. Business corrections never do.
    pub fn commit(
        &self,
        ctx: &CommitContext,
        kind: EntityKind,
        id: Option<RecordId>,
        patch: Patch,
    ) -> Result<RecordId> {
        self.write(ctx, kind, id, patch, Writer::Client, |_| Ok(()))
    }

    /// Commit as `writer`, once `check` accepts the persisted snapshot
    ///
    /// `check` sees the persisted record (`None` on create) under the record
    /// lock; an error from it aborts the write before anything is stored.
    pub(crate) fn write<F>(
        &self,
        ctx: &CommitContext,
        kind: EntityKind,
        id: Option<RecordId>,
        patch: Patch,
        writer: Writer,
        check: F,
    ) -> Result<RecordId>
    where
        F: FnOnce(Option<&Record>) -> Result<()>,
    {
        let (committed_id, revised) = match id {
            Some(id) => self.locked(&record_key(kind, id), || {
                self.store_revision(kind, Some(id), patch, writer, check)
            })?,
            None => self.store_revision(kind, None, patch, writer, check)?,
        };
        debug!(
            target: "tubtrack::commit",
            %kind,
            id = %committed_id,
            is_new = id.is_none(),
            ?writer,
            actor = ctx.actor().unwrap_or("-"),
            "Committed"
        );

        self.after_commit(
            ctx,
            CommitEvent {
                kind,
                id: committed_id,
                patch: revised,
                is_new: id.is_none(),
            },
        );
        Ok(committed_id)
    }

    fn store_revision<F>(
        &self,
        kind: EntityKind,
        id: Option<RecordId>,
        patch: Patch,
        writer: Writer,
        check: F,
    ) -> Result<(RecordId, Patch)>
    where
        F: FnOnce(Option<&Record>) -> Result<()>,
    {
        let current = match id {
            Some(id) => self.store.read(kind, id)?,
            None => None,
        };
        check(current.as_ref())?;
        let revised = self.revise(kind, patch, current.as_ref(), writer);
        let committed_id = self.store.upsert(kind, id, revised.clone())?;
        Ok((committed_id, revised))
    }

    /// Pre-commit hook: returns the patch that should actually be written
    ///
    /// `current` is the persisted snapshot, or `None` for a new record.
    /// Client-supplied closeout `processed_*` fields are dropped.
    pub fn before_commit(&self, kind: EntityKind, patch: Patch, current: Option<&Record>) -> Patch {
        self.revise(kind, patch, current, Writer::Client)
    }

    fn revise(
        &self,
        kind: EntityKind,
        patch: Patch,
        current: Option<&Record>,
        writer: Writer,
    ) -> Patch {
        let mut patch = coerce_patch(kind, patch);
        match kind {
            EntityKind::Tub => patch = lifecycle::apply(current, patch, Timestamp::now()),
            EntityKind::Closeout if writer == Writer::Client => {
                closeout::drop_processed_fields(current, &mut patch)
            }
            _ => {}
        }
        if current.is_none() && self.config.derive_titles {
            titles::fill_titles(kind, &mut patch);
        }
        patch
    }

    /// Post-commit hook: record the event and run the kind's workflow
    pub fn after_commit(&self, ctx: &CommitContext, event: CommitEvent) {
        let (kind, id) = (event.kind, event.id);
        ctx.record(event);

        match kind {
            EntityKind::Batch => {
                self.fan_out_batch(ctx, id);
            }
            EntityKind::Cabinet => {
                self.fan_out_cabinet(ctx, id);
            }
            EntityKind::Closeout => {
                if let Err(e) = self.process_closeout(ctx, id) {
                    warn!(target: "tubtrack::closeout", closeout_id = %id, error = %e, "Closeout processing failed");
                }
            }
            EntityKind::Tub | EntityKind::Slot => {}
        }
    }
}
