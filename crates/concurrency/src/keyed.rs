//! Advisory locks keyed by workflow
//!
//! Closes the check-then-create race between independent requests: two
//! first-triggers for the same batch both pass the existence check unless the
//! check and the creates run under one lock keyed by the parent.
//!
//! Locks are created lazily per key (`DashMap<String, Arc<Mutex<()>>>`) and
//! the entry is removed again once nobody holds or waits on it, so the map
//! does not grow with every batch ever fanned out.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

/// Per-key mutual exclusion shared across requests
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`
    ///
    /// Blocks while another thread holds the same key. Not re-entrant: a
    /// thread must not request a key it already holds.
    pub fn with_lock<T, F>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        // Clone the Arc out so the DashMap shard is not locked while we wait
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _held = lock.lock();
            trace!(target: "tubtrack::lock", key, "Advisory lock acquired");
            f()
        };

        // Map + our clone = 2: nobody else holds or waits on this key
        self.locks
            .remove_if(key, |_, entry| Arc::strong_count(entry) == 2);
        result
    }

    /// Number of keys with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock entries are live
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
