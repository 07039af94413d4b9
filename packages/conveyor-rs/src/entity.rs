//! Aggregate building blocks: audit stamps, domain events, domain rules.
//!
//! Aggregates compose these instead of inheriting from a base entity:
//!
//! - [`Audit`] tracks who created, last modified, and soft-deleted the
//!   aggregate; its fields are private so the soft-delete invariants
//!   cannot be bypassed
//! - [`EventBuffer`] accumulates domain events in order, deduplicated by
//!   value; the persistence boundary drains it with [`EventBuffer::take`]
//!   and nothing else ever clears it
//! - [`DomainValidationError`] is how constructors and mutators refuse
//!   invalid state, carrying the violated rules as field errors
//!
//! # Example
//!
//! ```ignore
//! pub struct Tenant {
//!     id: TenantId,
//!     name: String,
//!     audit: Audit,
//!     events: EventBuffer<TenantEvent>,
//! }
//!
//! impl Tenant {
//!     pub fn delete(&mut self, actor: Uuid) -> bool {
//!         if self.audit.mark_deleted(actor) {
//!             self.events.record(TenantEvent::Deleted);
//!             return true;
//!         }
//!         false
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCategory, ErrorInfo, FieldError};

// =============================================================================
// Audit
// =============================================================================

/// Creation, modification, and soft-delete stamps for one aggregate.
///
/// Invariants held by construction:
///
/// - `deleted_on` is `Some` exactly when `is_deleted` is true
/// - a delete or restore also counts as a modification
/// - stamps only move forward; nothing un-sets `modified_on`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    created_on: DateTime<Utc>,
    created_by: Uuid,
    modified_on: Option<DateTime<Utc>>,
    modified_by: Option<Uuid>,
    deleted_on: Option<DateTime<Utc>>,
    is_deleted: bool,
}

impl Audit {
    /// Stamps for a freshly created aggregate.
    pub fn created(actor: Uuid) -> Self {
        Self {
            created_on: Utc::now(),
            created_by: actor,
            modified_on: None,
            modified_by: None,
            deleted_on: None,
            is_deleted: false,
        }
    }

    /// Record a modification by `actor`.
    pub fn touch(&mut self, actor: Uuid) {
        self.modified_on = Some(Utc::now());
        self.modified_by = Some(actor);
    }

    /// Soft-delete. Returns false when already deleted, in which case
    /// nothing changes.
    pub fn mark_deleted(&mut self, actor: Uuid) -> bool {
        if self.is_deleted {
            return false;
        }
        self.is_deleted = true;
        self.deleted_on = Some(Utc::now());
        self.touch(actor);
        true
    }

    /// Undo a soft-delete. Returns false when not deleted.
    pub fn restore(&mut self, actor: Uuid) -> bool {
        if !self.is_deleted {
            return false;
        }
        self.is_deleted = false;
        self.deleted_on = None;
        self.touch(actor);
        true
    }

    /// When the aggregate was created.
    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    /// Who created the aggregate.
    pub fn created_by(&self) -> Uuid {
        self.created_by
    }

    /// When the aggregate was last modified, if ever.
    pub fn modified_on(&self) -> Option<DateTime<Utc>> {
        self.modified_on
    }

    /// Who last modified the aggregate, if anyone.
    pub fn modified_by(&self) -> Option<Uuid> {
        self.modified_by
    }

    /// When the aggregate was soft-deleted, if it is.
    pub fn deleted_on(&self) -> Option<DateTime<Utc>> {
        self.deleted_on
    }

    /// True while soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}

// =============================================================================
// Event Buffer
// =============================================================================

/// Ordered, value-deduplicated buffer of domain events.
///
/// Aggregates own one as a field and record into it from their mutators.
/// Recording the same event value twice is a no-op, which is what makes
/// "delete an already deleted aggregate" emit exactly one event. The
/// buffer is drained with [`take`](EventBuffer::take) by the persistence
/// boundary when the aggregate is saved.
#[derive(Debug, Clone)]
pub struct EventBuffer<E> {
    events: Vec<E>,
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E: PartialEq> EventBuffer<E> {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event unless an equal one is already buffered.
    ///
    /// Returns whether the event was recorded.
    pub fn record(&mut self, event: E) -> bool {
        if self.events.contains(&event) {
            return false;
        }
        self.events.push(event);
        true
    }

    /// The buffered events, in recording order.
    pub fn events(&self) -> &[E] {
        &self.events
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drain the buffer. Persistence-boundary use only.
    pub fn take(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }
}

// =============================================================================
// Domain Validation
// =============================================================================

/// Rejection of invalid aggregate state, raised by constructors and
/// mutators before anything changes.
///
/// Converts into a `Validation` [`ErrorInfo`] whose children carry the
/// violated rules, so a domain refusal surfaces to callers in exactly the
/// same shape as request validation.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainValidationError {
    rules: Vec<FieldError>,
}

impl DomainValidationError {
    /// From a list of violated rules.
    ///
    /// # Panics
    ///
    /// Panics if `rules` is empty.
    pub fn new(rules: Vec<FieldError>) -> Self {
        assert!(
            !rules.is_empty(),
            "a domain validation error must name at least one rule"
        );
        Self { rules }
    }

    /// From a single violated rule.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vec![FieldError::new(field, message)])
    }

    /// The violated rules.
    pub fn rules(&self) -> &[FieldError] {
        &self.rules
    }
}

impl std::fmt::Display for DomainValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .rules
            .iter()
            .map(FieldError::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "domain validation failed: {joined}")
    }
}

impl std::error::Error for DomainValidationError {}

impl From<DomainValidationError> for ErrorInfo {
    fn from(error: DomainValidationError) -> Self {
        let children: Vec<ErrorInfo> = error.rules.into_iter().map(ErrorInfo::from).collect();
        ErrorInfo::new(
            ErrorCategory::Validation,
            "domain.validation",
            "domain rules rejected the requested change",
        )
        .with_children(children)
    }
}
