//! Tubtrack - consistency engine for tub inventory
//!
//! Keeps derived inventory records and state transitions correct when a
//! persistence layer commits batches, cabinets, tubs and closeouts:
//! - tub lifecycle: legal transitions and system-owned `opened_at`/`emptied_at`
//! - fan-out: a batch creates its tubs, a cabinet its slots, exactly once
//! - closeout: retire the oldest eligible tubs, recording any shortfall
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tubtrack::{fields, CommitContext, Engine, EntityKind, MemoryStore, Patch, Value};
//!
//! let engine = Engine::new(Arc::new(MemoryStore::with_inventory_constraints()));
//! let ctx = CommitContext::new();
//!
//! let mut batch = Patch::new();
//! batch.insert(fields::FLAVOR_ID.into(), Value::Int(3));
//! batch.insert(fields::REQUESTED_COUNT.into(), Value::from("2.5"));
//! engine.commit(&ctx, EntityKind::Batch, None, batch)?;
//!
//! assert_eq!(engine.store().count(EntityKind::Tub), 3);
//! # Ok::<(), tubtrack::Error>(())
//! ```
//!
//! # Architecture
//!
//! Every write goes through [`Engine::commit`], which runs the pre-commit
//! corrections, writes through an [`EntityStore`], and dispatches the
//! post-commit workflows. Embedders with their own write path call
//! [`Engine::before_commit`] and [`Engine::after_commit`] directly.

pub use tubtrack_concurrency::{KeyedLocks, ReentrancyGuard};
pub use tubtrack_core::*;
pub use tubtrack_engine::{
    allocation_note, batch_plan, ChildPlan, CloseoutOutcome, CloseoutStatus, CommitContext,
    CommitEvent, Engine, EngineConfig, CONFIG_FILE_NAME,
};
pub use tubtrack_storage::{MemoryStore, UniqueConstraint};
