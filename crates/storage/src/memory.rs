//! MemoryStore: reference `EntityStore` backed by ordered maps
//!
//! This module implements the EntityStore trait using:
//! - `BTreeMap<RecordId, Patch>` per entity kind, so scans run in creation order
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` for monotonically increasing ids shared by all kinds
//! - Declared unique constraints checked under the write lock
//!
//! # Design Notes
//!
//! - **Merge updates**: `upsert` with an id merges the patch into the
//!   existing row; it never removes fields.
//! - **Constraints are atomic with the write**: the duplicate check and the
//!   insert happen under one write lock, which is what makes a unique
//!   constraint a real guard against concurrent fan-out.
//! - **Failure injection**: `fail_next_inserts` makes the next N inserts of a
//!   kind fail, and `fail_updates` fails updates after letting some through,
//!   for exercising skip-and-continue and partial-failure paths.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::trace;

use tubtrack_core::{
    fields, Direction, EntityKind, EntityStore, Error, OrderBy, Patch, Query, Record, RecordId,
    Result, Value,
};

/// Fields that must be unique together within one kind
///
/// A row only participates when every constrained field is present and not
/// blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    /// Kind the constraint applies to
    pub kind: EntityKind,
    /// Constrained fields
    pub fields: Vec<String>,
}

impl UniqueConstraint {
    /// Declare a constraint
    pub fn new(kind: EntityKind, fields: &[&str]) -> Self {
        UniqueConstraint {
            kind,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn tuple<'a>(&self, row: &'a Patch) -> Option<Vec<&'a Value>> {
        self.fields
            .iter()
            .map(|f| row.get(f).filter(|v| !v.is_blank()))
            .collect()
    }
}

type Table = BTreeMap<RecordId, Patch>;

/// In-memory entity store
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<FxHashMap<EntityKind, Table>>,
    constraints: Vec<UniqueConstraint>,
    next_id: AtomicU64,
    injected_failures: Mutex<FxHashMap<EntityKind, usize>>,
    injected_update_failures: Mutex<FxHashMap<EntityKind, UpdateFailures>>,
}

/// Pending update failures for one kind
#[derive(Debug, Clone, Copy)]
struct UpdateFailures {
    pass: usize,
    fail: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store without constraints
    pub fn new() -> Self {
        Self::with_constraints(Vec::new())
    }

    /// Create an empty store with the given unique constraints
    pub fn with_constraints(constraints: Vec<UniqueConstraint>) -> Self {
        MemoryStore {
            tables: RwLock::new(FxHashMap::default()),
            constraints,
            next_id: AtomicU64::new(0),
            injected_failures: Mutex::new(FxHashMap::default()),
            injected_update_failures: Mutex::new(FxHashMap::default()),
        }
    }

    /// Store with the constraints that make fan-out race-free
    ///
    /// - Tub: (batch_id, sequence_index)
    /// - Slot: (cabinet_id, sequence_index)
    pub fn with_inventory_constraints() -> Self {
        Self::with_constraints(vec![
            UniqueConstraint::new(EntityKind::Tub, &[fields::BATCH_ID, fields::SEQUENCE_INDEX]),
            UniqueConstraint::new(
                EntityKind::Slot,
                &[fields::CABINET_ID, fields::SEQUENCE_INDEX],
            ),
        ])
    }

    /// Make the next `count` inserts of `kind` fail with a storage error
    pub fn fail_next_inserts(&self, kind: EntityKind, count: usize) {
        self.injected_failures.lock().insert(kind, count);
    }

    /// Let the next `pass` updates of `kind` through, then fail `fail` of them
    pub fn fail_updates(&self, kind: EntityKind, pass: usize, fail: usize) {
        self.injected_update_failures
            .lock()
            .insert(kind, UpdateFailures { pass, fail });
    }

    /// Number of records of a kind
    pub fn count(&self, kind: EntityKind) -> usize {
        self.tables.read().get(&kind).map_or(0, BTreeMap::len)
    }

    /// Every record of a kind, in creation order
    pub fn all(&self, kind: EntityKind) -> Vec<Record> {
        self.tables
            .read()
            .get(&kind)
            .map(|table| {
                table
                    .iter()
                    .map(|(id, fields)| Record::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn next_id(&self) -> RecordId {
        RecordId::new(self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1)
    }

    fn take_injected_failure(&self, kind: EntityKind) -> bool {
        let mut failures = self.injected_failures.lock();
        match failures.get_mut(&kind) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn take_injected_update_failure(&self, kind: EntityKind) -> bool {
        let mut failures = self.injected_update_failures.lock();
        match failures.get_mut(&kind) {
            Some(pending) if pending.pass > 0 => {
                pending.pass -= 1;
                false
            }
            Some(pending) if pending.fail > 0 => {
                pending.fail -= 1;
                true
            }
            _ => false,
        }
    }

    fn check_constraints(
        &self,
        kind: EntityKind,
        table: &Table,
        id: Option<RecordId>,
        row: &Patch,
    ) -> Result<()> {
        for constraint in self.constraints.iter().filter(|c| c.kind == kind) {
            let Some(tuple) = constraint.tuple(row) else {
                continue;
            };
            let clash = table.iter().find(|(other_id, other_row)| {
                Some(**other_id) != id && constraint.tuple(other_row).as_ref() == Some(&tuple)
            });
            if let Some((existing, _)) = clash {
                return Err(Error::UniqueViolation {
                    kind,
                    fields: constraint.fields.join(","),
                    existing: *existing,
                });
            }
        }
        Ok(())
    }
}

impl EntityStore for MemoryStore {
    fn read(&self, kind: EntityKind, id: RecordId) -> Result<Option<Record>> {
        Ok(self
            .tables
            .read()
            .get(&kind)
            .and_then(|table| table.get(&id))
            .map(|fields| Record::new(id, fields.clone())))
    }

    fn upsert(&self, kind: EntityKind, id: Option<RecordId>, mut fields: Patch) -> Result<RecordId> {
        fields.remove("id");
        let mut tables = self.tables.write();
        let table = tables.entry(kind).or_default();

        match id {
            Some(id) => {
                let existing = table.get(&id).ok_or(Error::NotFound { kind, id })?;
                if self.take_injected_update_failure(kind) {
                    return Err(Error::Storage(format!("injected update failure for {} #{}", kind, id)));
                }
                let mut merged = existing.clone();
                merged.extend(fields);
                self.check_constraints(kind, table, Some(id), &merged)?;
                table.insert(id, merged);
                trace!(target: "tubtrack::store", %kind, %id, "Record updated");
                Ok(id)
            }
            None => {
                if self.take_injected_failure(kind) {
                    return Err(Error::Storage(format!("injected insert failure for {}", kind)));
                }
                self.check_constraints(kind, table, None, &fields)?;
                let id = self.next_id();
                table.insert(id, fields);
                trace!(target: "tubtrack::store", %kind, %id, "Record inserted");
                Ok(id)
            }
        }
    }

    fn query(&self, kind: EntityKind, query: &Query) -> Result<Vec<Record>> {
        let tables = self.tables.read();
        let Some(table) = tables.get(&kind) else {
            return Ok(Vec::new());
        };

        // BTreeMap iteration is ascending id, and sort_by is stable, so ties
        // stay in creation order.
        let mut matched: Vec<Record> = table
            .iter()
            .map(|(id, fields)| Record::new(*id, fields.clone()))
            .filter(|record| query.matches(record))
            .collect();
        if !query.order_by.is_empty() {
            matched.sort_by(|a, b| compare_records(a, b, &query.order_by));
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

fn compare_records(a: &Record, b: &Record, order_by: &[OrderBy]) -> Ordering {
    for key in order_by {
        let ord = compare_field(a.get(&key.field), b.get(&key.field), key.direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_field(a: Option<&Value>, b: Option<&Value>, direction: Direction) -> Ordering {
    let a = a.filter(|v| !v.is_blank());
    let b = b.filter(|v| !v.is_blank());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = compare_values(a, b);
            match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
