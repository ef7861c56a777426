//! Concurrency primitives for tubtrack
//!
//! This crate provides the two exclusion mechanisms the workflows rely on:
//! - ReentrancyGuard: request-scoped latch against cascading self-triggers
//! - KeyedLocks: cross-request advisory locks keyed by parent/closeout
//!
//! Neither is durable. Idempotency across crashes and retries comes from
//! entity-level markers checked inside the locked section.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod guard;
pub mod keyed;

pub use guard::{HeldKey, ReentrancyGuard};
pub use keyed::KeyedLocks;
