//! Inventory consistency engine for tubtrack
//!
//! This crate sits between a persistence layer and the inventory records:
//! - Engine: the commit path with pre-commit and post-commit hooks
//! - lifecycle: tub state machine and timestamp stamping (pre-commit)
//! - fanout: batch → tubs and cabinet → slots (post-commit)
//! - closeout: oldest-first tub retirement (post-commit)
//! - titles: derived titles and slugs for new records
//! - config: `tubtrack.toml`
//!
//! Workflows run synchronously on the caller's thread. Re-entry within one
//! request is stopped by the [`CommitContext`]'s guard; concurrent requests
//! on the same parent are serialized by per-key advisory locks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod closeout;
pub mod config;
pub mod context;
pub mod engine;
pub mod fanout;
pub mod lifecycle;
pub mod titles;

pub use closeout::{allocation_note, CloseoutOutcome, CloseoutStatus};
pub use config::{EngineConfig, CONFIG_FILE_NAME};
pub use context::{CommitContext, CommitEvent};
pub use engine::Engine;
pub use fanout::{batch_plan, ChildPlan};
