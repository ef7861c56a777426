//! Derived-record fan-out
//!
//! A batch fans out into tubs and a cabinet into slots. Both follow the same
//! sequence, run once per parent:
//!
//! 1. guard: a nested trigger from our own commits is a no-op
//! 2. advisory lock on the parent key (cross-request)
//! 3. read the parent; missing parent, non-positive count or a count above
//!    `max_children` creates nothing
//! 4. existence check: any child already referencing the parent means done
//! 5. create each child through [`Engine::commit`]; a failed child is logged
//!    and skipped
//!
//! The existence check is the idempotency gate for sequential retriggers.
//! Concurrent first triggers are serialized by the advisory lock, and a store
//! declaring (parent, sequence_index) unique rejects anything that slips past.

use tracing::{debug, info, warn};

use tubtrack_core::{
    fields, Batch, Cabinet, EntityKind, EntityStore, Patch, Query, Record, RecordId, TubState,
    Value,
};

use crate::context::CommitContext;
use crate::engine::Engine;

/// Fractional quantities are kept to a millionth of a tub
const QUANTITY_SCALE: f64 = 1e6;

/// One child a fan-out intends to create
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildPlan {
    /// Position within the parent, starting at 1
    pub sequence_index: i64,
    /// Fractional quantity; `None` for a whole tub
    pub quantity: Option<f64>,
}

/// Plan the tubs for a batch of `requested_count`
///
/// Whole tubs get sequence indices `1..=floor(n)`. A fractional remainder adds
/// one more tub with the highest index (`ceil(n)`) carrying the remainder as
/// its quantity; it is planned first. Non-positive or non-finite counts plan
/// nothing, and so does a count needing more than `max_children` tubs.
///
/// ```
/// use tubtrack_engine::batch_plan;
///
/// let plan = batch_plan(2.25, 100);
/// assert_eq!(plan.len(), 3);
/// assert_eq!(plan[0].sequence_index, 3);
/// assert_eq!(plan[0].quantity, Some(0.25));
///
/// assert!(batch_plan(1e19, 100).is_empty());
/// ```
pub fn batch_plan(requested_count: f64, max_children: usize) -> Vec<ChildPlan> {
    if !requested_count.is_finite() || requested_count <= 0.0 {
        return Vec::new();
    }
    let mut whole = requested_count.floor();
    let mut remainder = round_quantity(requested_count - whole);
    if remainder >= 1.0 {
        whole += 1.0;
        remainder = 0.0;
    }
    let total = whole + if remainder > 0.0 { 1.0 } else { 0.0 };
    if total > max_children as f64 {
        warn!(target: "tubtrack::fanout", requested_count, max_children, "Batch exceeds child limit, planning nothing");
        return Vec::new();
    }
    // Bounded by max_children above
    let whole = whole as i64;

    let mut plan = Vec::with_capacity(total as usize);
    if remainder > 0.0 {
        plan.push(ChildPlan {
            sequence_index: whole + 1,
            quantity: Some(remainder),
        });
    }
    plan.extend((1..=whole).map(|sequence_index| ChildPlan {
        sequence_index,
        quantity: None,
    }));
    plan
}

fn round_quantity(q: f64) -> f64 {
    (q * QUANTITY_SCALE).round() / QUANTITY_SCALE
}

fn fanout_key(kind: EntityKind, id: RecordId) -> String {
    format!("fanout:{}:{}", kind, id)
}

fn put_id(patch: &mut Patch, field: &str, id: Option<RecordId>) {
    if let Some(id) = id {
        patch.insert(field.to_string(), Value::from(id));
    }
}

fn tub_children(record: &Record, max_children: usize) -> Vec<Patch> {
    let batch = Batch::from_record(record);
    batch_plan(batch.requested_count, max_children)
        .into_iter()
        .map(|child| {
            let mut patch = Patch::new();
            put_id(&mut patch, fields::BATCH_ID, Some(batch.id));
            put_id(&mut patch, fields::FLAVOR_ID, batch.flavor_id);
            put_id(&mut patch, fields::LOCATION_ID, batch.location_id);
            patch.insert(
                fields::SEQUENCE_INDEX.to_string(),
                Value::Int(child.sequence_index),
            );
            patch.insert(
                fields::STATE.to_string(),
                Value::from(TubState::Hardening.as_str()),
            );
            if let Some(quantity) = child.quantity {
                patch.insert(fields::QUANTITY.to_string(), Value::Float(quantity));
            }
            patch
        })
        .collect()
}

fn slot_children(record: &Record, max_children: usize) -> Vec<Patch> {
    let cabinet = Cabinet::from_record(record);
    if u64::try_from(cabinet.capacity).map_or(false, |n| n > max_children as u64) {
        warn!(
            target: "tubtrack::fanout",
            cabinet_id = %cabinet.id,
            capacity = cabinet.capacity,
            max_children,
            "Cabinet exceeds child limit, planning nothing"
        );
        return Vec::new();
    }
    (1..=cabinet.capacity.max(0))
        .map(|sequence_index| {
            let mut patch = Patch::new();
            put_id(&mut patch, fields::CABINET_ID, Some(cabinet.id));
            put_id(&mut patch, fields::LOCATION_ID, cabinet.location_id);
            patch.insert(fields::SEQUENCE_INDEX.to_string(), Value::Int(sequence_index));
            patch
        })
        .collect()
}

impl<S: EntityStore> Engine<S> {
    /// Create the tubs for a batch, once
    ///
    /// Returns the number of tubs created; 0 when the batch is missing, its
    /// count is not positive, tubs already exist, or the call is nested inside
    /// this batch's own fan-out. Publishes the batch afterwards when enabled.
    pub fn fan_out_batch(&self, ctx: &CommitContext, batch_id: RecordId) -> usize {
        let key = fanout_key(EntityKind::Batch, batch_id);
        ctx.guard().with_guard(
            &key,
            || {
                self.locked(&key, || {
                    let created = self.create_children(
                        ctx,
                        EntityKind::Batch,
                        batch_id,
                        EntityKind::Tub,
                        fields::BATCH_ID,
                        |batch| tub_children(batch, self.config().max_children),
                    );
                    if created > 0 && self.config().publish_batches {
                        self.publish_batch(ctx, batch_id);
                    }
                    created
                })
            },
            0,
        )
    }

    /// Create the slots for a cabinet, once
    ///
    /// Returns the number of slots created, with the same zero cases as
    /// [`Engine::fan_out_batch`].
    pub fn fan_out_cabinet(&self, ctx: &CommitContext, cabinet_id: RecordId) -> usize {
        let key = fanout_key(EntityKind::Cabinet, cabinet_id);
        ctx.guard().with_guard(
            &key,
            || {
                self.locked(&key, || {
                    self.create_children(
                        ctx,
                        EntityKind::Cabinet,
                        cabinet_id,
                        EntityKind::Slot,
                        fields::CABINET_ID,
                        |cabinet| slot_children(cabinet, self.config().max_children),
                    )
                })
            },
            0,
        )
    }

    fn create_children(
        &self,
        ctx: &CommitContext,
        parent_kind: EntityKind,
        parent_id: RecordId,
        child_kind: EntityKind,
        link_field: &str,
        plan: impl FnOnce(&Record) -> Vec<Patch>,
    ) -> usize {
        let parent = match self.store().read(parent_kind, parent_id) {
            Ok(Some(parent)) => parent,
            Ok(None) => {
                debug!(target: "tubtrack::fanout", %parent_kind, %parent_id, "Parent not found");
                return 0;
            }
            Err(e) => {
                warn!(target: "tubtrack::fanout", %parent_kind, %parent_id, error = %e, "Failed to read parent");
                return 0;
            }
        };

        let children = plan(&parent);
        if children.is_empty() {
            debug!(target: "tubtrack::fanout", %parent_kind, %parent_id, "Nothing to create");
            return 0;
        }

        let existing = Query::new().eq(link_field, parent_id).limit(1);
        match self.store().exists(child_kind, &existing) {
            Ok(false) => {}
            Ok(true) => {
                debug!(target: "tubtrack::fanout", %parent_kind, %parent_id, "Children already exist");
                return 0;
            }
            Err(e) => {
                warn!(target: "tubtrack::fanout", %parent_kind, %parent_id, error = %e, "Existence check failed");
                return 0;
            }
        }

        let planned = children.len();
        let mut created = 0;
        for child in children {
            let sequence_index = child.get(fields::SEQUENCE_INDEX).cloned();
            match self.commit(ctx, child_kind, None, child) {
                Ok(_) => created += 1,
                Err(e) => {
                    warn!(
                        target: "tubtrack::fanout",
                        %parent_kind,
                        %parent_id,
                        %child_kind,
                        sequence_index = ?sequence_index,
                        error = %e,
                        "Child creation failed, skipping"
                    );
                }
            }
        }

        info!(
            target: "tubtrack::fanout",
            %parent_kind,
            %parent_id,
            planned,
            created,
            "Fan-out complete"
        );
        created
    }

    fn publish_batch(&self, ctx: &CommitContext, batch_id: RecordId) {
        let mut patch = Patch::new();
        patch.insert(fields::PUBLISHED.to_string(), Value::Bool(true));
        if let Err(e) = self.commit(ctx, EntityKind::Batch, Some(batch_id), patch) {
            warn!(target: "tubtrack::fanout", %batch_id, error = %e, "Failed to publish batch");
        }
    }
}
