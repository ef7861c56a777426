//! Request-scoped commit context and commit events
//!
//! A `CommitContext` is created by the caller for one incoming request and
//! passed by reference through every commit the request causes, including
//! the commits workflows issue themselves. It owns the re-entrancy guard, so
//! guard state never leaks between requests or between tests.

use std::cell::RefCell;

use tubtrack_concurrency::ReentrancyGuard;
use tubtrack_core::{EntityKind, Patch, RecordId};

/// Emitted after every successful commit
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEvent {
    /// Kind of the committed record
    pub kind: EntityKind,
    /// Id of the committed record
    pub id: RecordId,
    /// Patch as it was actually written (after pre-commit correction)
    pub patch: Patch,
    /// Whether the commit created the record
    pub is_new: bool,
}

/// Per-request context
#[derive(Debug, Default)]
pub struct CommitContext {
    guard: ReentrancyGuard,
    actor: Option<String>,
    emitted: RefCell<Vec<CommitEvent>>,
}

impl CommitContext {
    /// Anonymous context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context tagged with the acting user, for logs
    pub fn for_actor(actor: impl Into<String>) -> Self {
        CommitContext {
            actor: Some(actor.into()),
            ..Self::default()
        }
    }

    /// The request's re-entrancy guard
    pub fn guard(&self) -> &ReentrancyGuard {
        &self.guard
    }

    /// Acting user, if known
    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub(crate) fn record(&self, event: CommitEvent) {
        self.emitted.borrow_mut().push(event);
    }

    /// Every commit event emitted in this request, in order
    pub fn emitted(&self) -> Vec<CommitEvent> {
        self.emitted.borrow().clone()
    }

    /// Number of commit events of one kind
    pub fn emitted_count(&self, kind: EntityKind) -> usize {
        self.emitted.borrow().iter().filter(|e| e.kind == kind).count()
    }
}
