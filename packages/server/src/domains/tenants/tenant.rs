//! Tenant aggregate: the unit of isolation everything else hangs off.
//!
//! Mutators validate their input, stamp the audit trail, and record domain
//! events into the aggregate's buffer. The buffer is drained by the
//! persistence layer when the aggregate is saved; events reach the journal
//! only after the surrounding unit of work commits.

use conveyor::{Audit, DomainValidationError, EventBuffer, FieldError};
use uuid::Uuid;

use crate::common::TenantId;

/// Longest name a tenant may carry, in characters.
pub const MAX_NAME_LEN: usize = 200;

/// Domain events emitted by [`Tenant`] mutators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantEvent {
    Created {
        id: TenantId,
        name: String,
    },
    Renamed {
        id: TenantId,
        old: String,
        new: String,
    },
    Deleted {
        id: TenantId,
    },
    Restored {
        id: TenantId,
    },
}

/// A tenant of the platform.
///
/// Fields are private: all mutation goes through methods that enforce the
/// naming rules and keep the audit trail and event buffer consistent.
#[derive(Debug, Clone)]
pub struct Tenant {
    id: TenantId,
    name: String,
    audit: Audit,
    events: EventBuffer<TenantEvent>,
}

impl Tenant {
    /// Create a new tenant with a validated name.
    ///
    /// The name is trimmed before any rule runs; the trimmed form is what
    /// gets stored.
    pub fn create(name: &str, actor: Uuid) -> Result<Self, DomainValidationError> {
        let name = valid_name(name)?;
        let id = TenantId::new();
        let mut tenant = Tenant {
            id,
            name: name.clone(),
            audit: Audit::created(actor),
            events: EventBuffer::new(),
        };
        tenant.events.record(TenantEvent::Created { id, name });
        Ok(tenant)
    }

    /// Rename the tenant.
    ///
    /// Renaming to the current name is a no-op: no event is recorded and the
    /// audit trail is left untouched. Returns whether anything changed.
    pub fn rename(&mut self, name: &str, actor: Uuid) -> Result<bool, DomainValidationError> {
        let name = valid_name(name)?;
        if name == self.name {
            return Ok(false);
        }
        let old = std::mem::replace(&mut self.name, name.clone());
        self.audit.touch(actor);
        self.events.record(TenantEvent::Renamed {
            id: self.id,
            old,
            new: name,
        });
        Ok(true)
    }

    /// Soft-delete the tenant. Deleting an already deleted tenant changes
    /// nothing and records nothing. Returns whether anything changed.
    pub fn delete(&mut self, actor: Uuid) -> bool {
        if !self.audit.mark_deleted(actor) {
            return false;
        }
        self.events.record(TenantEvent::Deleted { id: self.id });
        true
    }

    /// Undo a soft delete. A no-op unless the tenant is currently deleted.
    /// Returns whether anything changed.
    pub fn restore(&mut self, actor: Uuid) -> bool {
        if !self.audit.restore(actor) {
            return false;
        }
        self.events.record(TenantEvent::Restored { id: self.id });
        true
    }

    pub fn id(&self) -> TenantId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    pub fn is_deleted(&self) -> bool {
        self.audit.is_deleted()
    }

    /// Events recorded since the last save.
    pub fn events(&self) -> &[TenantEvent] {
        self.events.events()
    }

    /// Drain the event buffer. Called by the persistence layer when the
    /// aggregate is saved; nothing else should clear events.
    pub fn take_events(&mut self) -> Vec<TenantEvent> {
        self.events.take()
    }
}

/// Rules for a proposed tenant name. Shared by the aggregate and by the
/// request validators registered for the create/rename commands.
pub fn name_rules(name: &str) -> Vec<FieldError> {
    let trimmed = name.trim();
    let mut rules = Vec::new();
    if trimmed.is_empty() {
        rules.push(FieldError::new("name", "must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        rules.push(FieldError::new(
            "name",
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    rules
}

fn valid_name(name: &str) -> Result<String, DomainValidationError> {
    let rules = name_rules(name);
    if rules.is_empty() {
        Ok(name.trim().to_string())
    } else {
        Err(DomainValidationError::new(rules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> Uuid {
        Uuid::new_v4()
    }

    // ===== Creation Tests =====

    #[test]
    fn test_create_trims_and_records_created() {
        let tenant = Tenant::create("  Acme  ", actor()).unwrap();

        assert_eq!(tenant.name(), "Acme");
        assert!(!tenant.is_deleted());
        assert_eq!(
            tenant.events(),
            &[TenantEvent::Created {
                id: tenant.id(),
                name: "Acme".into(),
            }]
        );
    }

    #[test]
    fn test_create_stamps_audit() {
        let by = actor();
        let tenant = Tenant::create("Acme", by).unwrap();

        assert_eq!(tenant.audit().created_by(), by);
        assert!(tenant.audit().modified_on().is_none());
    }

    #[test]
    fn test_create_rejects_blank_name() {
        let err = Tenant::create("   ", actor()).unwrap_err();

        assert_eq!(err.rules().len(), 1);
        assert_eq!(err.rules()[0].field, "name");
    }

    #[test]
    fn test_create_rejects_oversized_name() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        let err = Tenant::create(&long, actor()).unwrap_err();

        assert_eq!(err.rules().len(), 1);
        assert!(err.rules()[0].message.contains("200"));
    }

    #[test]
    fn test_create_accepts_name_at_limit() {
        let exact = "x".repeat(MAX_NAME_LEN);
        assert!(Tenant::create(&exact, actor()).is_ok());
    }

    // ===== Rename Tests =====

    #[test]
    fn test_rename_records_old_and_new() {
        let mut tenant = Tenant::create("Acme", actor()).unwrap();
        tenant.take_events();

        let changed = tenant.rename("Acme Corp", actor()).unwrap();

        assert!(changed);
        assert_eq!(tenant.name(), "Acme Corp");
        assert!(tenant.audit().modified_on().is_some());
        assert_eq!(
            tenant.events(),
            &[TenantEvent::Renamed {
                id: tenant.id(),
                old: "Acme".into(),
                new: "Acme Corp".into(),
            }]
        );
    }

    #[test]
    fn test_rename_to_current_name_is_a_no_op() {
        let mut tenant = Tenant::create("Acme", actor()).unwrap();
        tenant.take_events();

        let changed = tenant.rename("  Acme  ", actor()).unwrap();

        assert!(!changed);
        assert!(tenant.events().is_empty());
        assert!(tenant.audit().modified_on().is_none());
    }

    #[test]
    fn test_rename_rejects_blank_name_and_leaves_state() {
        let mut tenant = Tenant::create("Acme", actor()).unwrap();
        tenant.take_events();

        assert!(tenant.rename("", actor()).is_err());
        assert_eq!(tenant.name(), "Acme");
        assert!(tenant.events().is_empty());
    }

    // ===== Delete / Restore Tests =====

    #[test]
    fn test_delete_twice_records_once() {
        let mut tenant = Tenant::create("Acme", actor()).unwrap();
        tenant.take_events();

        assert!(tenant.delete(actor()));
        assert!(!tenant.delete(actor()));

        assert!(tenant.is_deleted());
        assert_eq!(tenant.events(), &[TenantEvent::Deleted { id: tenant.id() }]);
    }

    #[test]
    fn test_second_delete_preserves_first_stamp() {
        let first = actor();
        let second = actor();
        let mut tenant = Tenant::create("Acme", first).unwrap();

        tenant.delete(first);
        let deleted_on = tenant.audit().deleted_on();
        tenant.delete(second);

        assert_eq!(tenant.audit().deleted_on(), deleted_on);
        assert_eq!(tenant.audit().modified_by(), Some(first));
    }

    #[test]
    fn test_restore_only_when_deleted() {
        let mut tenant = Tenant::create("Acme", actor()).unwrap();
        tenant.take_events();

        assert!(!tenant.restore(actor()));
        assert!(tenant.events().is_empty());

        tenant.delete(actor());
        assert!(tenant.restore(actor()));
        assert!(!tenant.is_deleted());
        assert_eq!(
            tenant.events(),
            &[
                TenantEvent::Deleted { id: tenant.id() },
                TenantEvent::Restored { id: tenant.id() },
            ]
        );
    }

    #[test]
    fn test_take_events_drains() {
        let mut tenant = Tenant::create("Acme", actor()).unwrap();

        let events = tenant.take_events();
        assert_eq!(events.len(), 1);
        assert!(tenant.events().is_empty());
    }
}
