//! Re-entrancy guard for triggered workflows
//!
//! A workflow that writes through the commit path can trigger itself again:
//! publishing a batch emits a batch commit event, which would start batch
//! fan-out a second time inside the first. [`ReentrancyGuard`] turns that
//! nested trigger into a no-op.
//!
//! ## Scope
//!
//! The guard is request-scoped. It lives in the caller's per-request context
//! and is passed down explicitly; it is deliberately `!Sync`. It does NOT
//! provide cross-request mutual exclusion (see [`crate::KeyedLocks`]), and it
//! is not durable: completion of a workflow is recorded on the entities
//! themselves (existence checks, `processed_at`), never in the guard.

use std::cell::RefCell;

use rustc_hash::FxHashSet;
use tracing::debug;

/// Keyed latch that rejects re-entry within one call stack
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    held: RefCell<FxHashSet<String>>,
}

impl ReentrancyGuard {
    /// Create a guard with no keys held
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding `key`
    ///
    /// If `key` is already held further up the call stack, `f` is not called
    /// and `default_on_busy` is returned. Otherwise the key is released when
    /// `f` returns, including by unwinding.
    pub fn with_guard<T, F>(&self, key: &str, f: F, default_on_busy: T) -> T
    where
        F: FnOnce() -> T,
    {
        match self.try_acquire(key) {
            Some(_held) => f(),
            None => {
                debug!(target: "tubtrack::guard", key, "Re-entrant trigger ignored");
                default_on_busy
            }
        }
    }

    /// Acquire `key` for the lifetime of the returned handle
    ///
    /// Returns `None` if the key is already held.
    pub fn try_acquire(&self, key: &str) -> Option<HeldKey<'_>> {
        let inserted = self.held.borrow_mut().insert(key.to_string());
        inserted.then(|| HeldKey {
            guard: self,
            key: key.to_string(),
        })
    }

    /// Whether `key` is currently held
    pub fn is_held(&self, key: &str) -> bool {
        self.held.borrow().contains(key)
    }

    /// Number of keys currently held
    pub fn held_count(&self) -> usize {
        self.held.borrow().len()
    }
}

/// RAII handle for a held guard key
///
/// Releases the key on drop, so a workflow that returns early, propagates an
/// error or panics never leaves its key behind.
#[derive(Debug)]
pub struct HeldKey<'a> {
    guard: &'a ReentrancyGuard,
    key: String,
}

impl HeldKey<'_> {
    /// The held key
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for HeldKey<'_> {
    fn drop(&mut self) {
        self.guard.held.borrow_mut().remove(&self.key);
    }
}
