//! TenantUser aggregate: a person's membership within one tenant.
//!
//! Identity rules are regex-based. Both fields are checked together on
//! creation so a caller sees every violation at once, not one per attempt.

use std::sync::LazyLock;

use conveyor::{Audit, DomainValidationError, EventBuffer, FieldError};
use regex::Regex;
use uuid::Uuid;

use crate::common::{TenantId, TenantUserId};

static RE_USER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]{3,}$").unwrap());
static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Domain events emitted by [`TenantUser`] mutators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantUserEvent {
    Created {
        id: TenantUserId,
        tenant_id: TenantId,
        user_name: String,
    },
    UserNameChanged {
        id: TenantUserId,
        old: String,
        new: String,
    },
    EmailChanged {
        id: TenantUserId,
        old: String,
        new: String,
    },
    Deleted {
        id: TenantUserId,
    },
    Restored {
        id: TenantUserId,
    },
}

/// A member of a tenant.
#[derive(Debug, Clone)]
pub struct TenantUser {
    id: TenantUserId,
    tenant_id: TenantId,
    user_name: String,
    email: String,
    audit: Audit,
    events: EventBuffer<TenantUserEvent>,
}

impl TenantUser {
    /// Create a membership with a validated user name and email.
    ///
    /// Violations from both fields are aggregated into one error.
    pub fn create(
        tenant_id: TenantId,
        user_name: &str,
        email: &str,
        actor: Uuid,
    ) -> Result<Self, DomainValidationError> {
        let user_name = user_name.trim();
        let email = email.trim();

        let mut rules: Vec<FieldError> = Vec::new();
        rules.extend(user_name_rule(user_name));
        rules.extend(email_rule(email));
        if !rules.is_empty() {
            return Err(DomainValidationError::new(rules));
        }

        let id = TenantUserId::new();
        let mut user = TenantUser {
            id,
            tenant_id,
            user_name: user_name.to_string(),
            email: email.to_string(),
            audit: Audit::created(actor),
            events: EventBuffer::new(),
        };
        user.events.record(TenantUserEvent::Created {
            id,
            tenant_id,
            user_name: user_name.to_string(),
        });
        Ok(user)
    }

    /// Change the user name. A no-op when the trimmed name is unchanged.
    /// Returns whether anything changed.
    pub fn set_user_name(
        &mut self,
        user_name: &str,
        actor: Uuid,
    ) -> Result<bool, DomainValidationError> {
        let user_name = user_name.trim();
        if let Some(rule) = user_name_rule(user_name) {
            return Err(DomainValidationError::new(vec![rule]));
        }
        if user_name == self.user_name {
            return Ok(false);
        }
        let old = std::mem::replace(&mut self.user_name, user_name.to_string());
        self.audit.touch(actor);
        self.events.record(TenantUserEvent::UserNameChanged {
            id: self.id,
            old,
            new: user_name.to_string(),
        });
        Ok(true)
    }

    /// Change the email address. A no-op when the trimmed address is
    /// unchanged. Returns whether anything changed.
    pub fn set_email(&mut self, email: &str, actor: Uuid) -> Result<bool, DomainValidationError> {
        let email = email.trim();
        if let Some(rule) = email_rule(email) {
            return Err(DomainValidationError::new(vec![rule]));
        }
        if email == self.email {
            return Ok(false);
        }
        let old = std::mem::replace(&mut self.email, email.to_string());
        self.audit.touch(actor);
        self.events.record(TenantUserEvent::EmailChanged {
            id: self.id,
            old,
            new: email.to_string(),
        });
        Ok(true)
    }

    /// Soft-delete the membership. Returns whether anything changed.
    pub fn delete(&mut self, actor: Uuid) -> bool {
        if !self.audit.mark_deleted(actor) {
            return false;
        }
        self.events.record(TenantUserEvent::Deleted { id: self.id });
        true
    }

    /// Undo a soft delete. Returns whether anything changed.
    pub fn restore(&mut self, actor: Uuid) -> bool {
        if !self.audit.restore(actor) {
            return false;
        }
        self.events.record(TenantUserEvent::Restored { id: self.id });
        true
    }

    pub fn id(&self) -> TenantUserId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    pub fn is_deleted(&self) -> bool {
        self.audit.is_deleted()
    }

    /// Events recorded since the last save.
    pub fn events(&self) -> &[TenantUserEvent] {
        self.events.events()
    }

    /// Drain the event buffer. Called by the persistence layer when the
    /// aggregate is saved.
    pub fn take_events(&mut self) -> Vec<TenantUserEvent> {
        self.events.take()
    }
}

/// Rule for a proposed user name, shared with the request validators.
pub fn user_name_rule(user_name: &str) -> Option<FieldError> {
    if RE_USER_NAME.is_match(user_name.trim()) {
        None
    } else {
        Some(FieldError::new(
            "user_name",
            "must be at least 3 characters: letters, digits, dots, dashes or underscores",
        ))
    }
}

/// Rule for a proposed email address, shared with the request validators.
pub fn email_rule(email: &str) -> Option<FieldError> {
    if RE_EMAIL.is_match(email.trim()) {
        None
    } else {
        Some(FieldError::new("email", "must be a valid email address"))
    }
}
