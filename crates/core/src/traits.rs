//! Collaborator traits
//!
//! The core never owns persistence or authorization. It talks to:
//! - [`EntityStore`]: the persistence layer (read / upsert / query)
//! - [`AccessPolicy`]: role-gated field writes, consumed by callers only

use std::collections::HashSet;

use tracing::debug;

use crate::error::Result;
use crate::types::{EntityKind, Patch, Record, RecordId};
use crate::value::Value;

/// Single-field predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value
    Eq(String, Value),
    /// Field equals one of the values
    In(String, Vec<Value>),
    /// Field is missing or blank
    IsBlank(String),
    /// Field is present and not blank
    NotBlank(String),
}

impl Filter {
    /// Field equals value
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    /// Field equals one of the values
    pub fn one_of<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    /// Evaluate against a record
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq(field, value) => record.get(field) == Some(value),
            Filter::In(field, values) => record
                .get(field)
                .map_or(false, |v| values.iter().any(|candidate| candidate == v)),
            Filter::IsBlank(field) => record.is_blank(field),
            Filter::NotBlank(field) => !record.is_blank(field),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first
    Asc,
    /// Largest first
    Desc,
}

/// Sort key; blank values always sort last regardless of direction
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Field to sort on
    pub field: String,
    /// Sort direction
    pub direction: Direction,
}

/// Store query: all filters must match
///
/// Results are ordered by `order_by`, then by ascending id (creation order),
/// then truncated to `limit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Conjunctive filters
    pub filters: Vec<Filter>,
    /// Sort keys, most significant first
    pub order_by: Vec<OrderBy>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl Query {
    /// Empty query (every record)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter
    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(field, value))
    }

    /// Add an ascending sort key
    pub fn order_asc(mut self, field: &str) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction: Direction::Asc,
        });
        self
    }

    /// Add a descending sort key
    pub fn order_desc(mut self, field: &str) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction: Direction::Desc,
        });
        self
    }

    /// Cap the number of results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record passes every filter
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }
}

/// Persistence layer abstraction
///
/// Each call is an independent commit; the core never holds a store-wide
/// lock across calls. Callers needing atomicity across a whole workflow wrap
/// it in their own transaction.
///
/// Thread safety: all methods must be safe to call concurrently.
pub trait EntityStore: Send + Sync {
    /// Read a record by id
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails. A missing record is
    /// `Ok(None)`.
    fn read(&self, kind: EntityKind, id: RecordId) -> Result<Option<Record>>;

    /// Insert (`id = None`) or merge-update a record
    ///
    /// Returns the id of the written record.
    ///
    /// # Errors
    ///
    /// `NotFound` when updating an unknown id, `UniqueViolation` when a
    /// declared constraint would be broken, or a storage failure.
    fn upsert(&self, kind: EntityKind, id: Option<RecordId>, fields: Patch) -> Result<RecordId>;

    /// Query records of one kind
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn query(&self, kind: EntityKind, query: &Query) -> Result<Vec<Record>>;

    /// Whether any record matches
    fn exists(&self, kind: EntityKind, query: &Query) -> Result<bool> {
        let first = query.clone().limit(1);
        Ok(!self.query(kind, &first)?.is_empty())
    }
}

/// Role-gated field write policy
pub trait AccessPolicy: Send + Sync {
    /// Fields the role may write on the given kind
    fn writable_fields(&self, role: &str, kind: EntityKind) -> HashSet<String>;
}

/// Drop every field the role may not write
///
/// Called by the CRUD layer before a patch reaches the engine.
pub fn filter_patch(
    policy: &dyn AccessPolicy,
    role: &str,
    kind: EntityKind,
    patch: Patch,
) -> Patch {
    let writable = policy.writable_fields(role, kind);
    patch
        .into_iter()
        .filter(|(field, _)| {
            let allowed = writable.contains(field);
            if !allowed {
                debug!(target: "tubtrack::policy", role, %kind, field = %field, "Dropped non-writable field");
            }
            allowed
        })
        .collect()
}
