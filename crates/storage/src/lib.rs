//! Storage layer for tubtrack
//!
//! The engine is written against the `EntityStore` trait and never assumes a
//! particular database. This crate provides the reference implementation:
//! - MemoryStore: ordered in-memory tables with RwLock
//! - UniqueConstraint: declared field tuples rejected on duplicate
//!
//! It backs the test suites and benchmarks, and is usable by embedders that
//! keep inventory in memory.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;

pub use memory::{MemoryStore, UniqueConstraint};
