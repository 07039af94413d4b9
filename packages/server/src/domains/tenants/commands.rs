//! Tenant commands and their handlers.
//!
//! `CreateTenant` is idempotent: the caller supplies a `RequestId`, and a
//! retry with the same id replays the recorded outcome instead of creating a
//! second tenant. The rest are plain commands. All of them run inside a unit
//! of work; nothing here commits or rolls back explicitly.

use async_trait::async_trait;
use conveyor::{
    Command, ErrorInfo, FieldError, Handler, Outcome, Request, RequestContext, RequestId,
    WithRequestId,
};
use serde::{Deserialize, Serialize};

use crate::common::TenantId;
use crate::domains::tenants::tenant::{name_rules, Tenant};
use crate::kernel::{request_actor, ServerDeps};

// =============================================================================
// Requests
// =============================================================================

/// Create a tenant with the given name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    /// Caller-supplied identity of this logical operation.
    pub request_id: RequestId,
    pub name: String,
}

impl Request for CreateTenant {
    type Output = TenantId;
}

impl Command for CreateTenant {}

impl WithRequestId for CreateTenant {
    fn request_id(&self) -> RequestId {
        self.request_id
    }
}

/// Rename an existing tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameTenant {
    pub id: TenantId,
    pub name: String,
}

impl Request for RenameTenant {
    type Output = ();
}

impl Command for RenameTenant {}

/// Soft-delete a tenant. Deleting a deleted tenant succeeds and changes
/// nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTenant {
    pub id: TenantId,
}

impl Request for DeleteTenant {
    type Output = ();
}

impl Command for DeleteTenant {}

/// Undo a soft delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreTenant {
    pub id: TenantId,
}

impl Request for RestoreTenant {
    type Output = ();
}

impl Command for RestoreTenant {}

// =============================================================================
// Request validators
// =============================================================================

/// Name rules for `CreateTenant`, registered as a request validator.
pub fn create_tenant_rules(request: &CreateTenant) -> Vec<FieldError> {
    name_rules(&request.name)
}

/// Name rules for `RenameTenant`, registered as a request validator.
pub fn rename_tenant_rules(request: &RenameTenant) -> Vec<FieldError> {
    name_rules(&request.name)
}

// =============================================================================
// Handlers
// =============================================================================

pub struct CreateTenantHandler;

#[async_trait]
impl Handler<CreateTenant, ServerDeps> for CreateTenantHandler {
    async fn execute(
        &self,
        request: &CreateTenant,
        ctx: &RequestContext<ServerDeps>,
    ) -> Outcome<TenantId> {
        let db = &ctx.deps().db;
        if db.find_tenant_by_name(&request.name).is_some() {
            return Outcome::failure(duplicate_name(&request.name));
        }

        let mut tenant = match Tenant::create(&request.name, request_actor(ctx)) {
            Ok(tenant) => tenant,
            Err(err) => return Outcome::failure(err),
        };
        let id = tenant.id();
        db.save_tenant(&mut tenant);
        Outcome::success(id)
    }
}

pub struct RenameTenantHandler;

#[async_trait]
impl Handler<RenameTenant, ServerDeps> for RenameTenantHandler {
    async fn execute(
        &self,
        request: &RenameTenant,
        ctx: &RequestContext<ServerDeps>,
    ) -> Outcome<()> {
        let db = &ctx.deps().db;
        let Some(mut tenant) = db.get_tenant(request.id).filter(|t| !t.is_deleted()) else {
            return Outcome::failure(not_found(request.id));
        };

        let taken = db.find_tenant_by_name(&request.name);
        if taken.is_some_and(|other| other.id() != tenant.id()) {
            return Outcome::failure(duplicate_name(&request.name));
        }

        match tenant.rename(&request.name, request_actor(ctx)) {
            Ok(changed) => {
                if changed {
                    db.save_tenant(&mut tenant);
                }
                Outcome::success(())
            }
            Err(err) => Outcome::failure(err),
        }
    }
}

pub struct DeleteTenantHandler;

#[async_trait]
impl Handler<DeleteTenant, ServerDeps> for DeleteTenantHandler {
    async fn execute(
        &self,
        request: &DeleteTenant,
        ctx: &RequestContext<ServerDeps>,
    ) -> Outcome<()> {
        let db = &ctx.deps().db;
        let Some(mut tenant) = db.get_tenant(request.id) else {
            return Outcome::failure(not_found(request.id));
        };

        if tenant.delete(request_actor(ctx)) {
            db.save_tenant(&mut tenant);
        }
        Outcome::success(())
    }
}

pub struct RestoreTenantHandler;

#[async_trait]
impl Handler<RestoreTenant, ServerDeps> for RestoreTenantHandler {
    async fn execute(
        &self,
        request: &RestoreTenant,
        ctx: &RequestContext<ServerDeps>,
    ) -> Outcome<()> {
        let db = &ctx.deps().db;
        let Some(mut tenant) = db.get_tenant(request.id) else {
            return Outcome::failure(not_found(request.id));
        };

        if tenant.restore(request_actor(ctx)) {
            db.save_tenant(&mut tenant);
        }
        Outcome::success(())
    }
}

fn duplicate_name(name: &str) -> ErrorInfo {
    ErrorInfo::conflict(
        "tenant.duplicate_name",
        format!("a tenant named \"{}\" already exists", name.trim()),
    )
}

fn not_found(id: TenantId) -> ErrorInfo {
    ErrorInfo::not_found("tenant.not_found", format!("no tenant with id {id}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use conveyor::{ErrorCategory, UnitOfWorkFactory};
    use uuid::Uuid;

    use super::*;
    use crate::kernel::{MemoryDb, MemoryUnitOfWorkFactory};

    fn ctx(db: &Arc<MemoryDb>) -> RequestContext<ServerDeps> {
        RequestContext::for_testing(Arc::new(ServerDeps::new(db.clone())))
    }

    /// Seed a committed tenant the way a completed command would.
    async fn seed(db: &Arc<MemoryDb>, name: &str) -> TenantId {
        let mut uow = MemoryUnitOfWorkFactory::new(db.clone()).create();
        uow.begin().await.unwrap();
        let mut tenant = Tenant::create(name, Uuid::new_v4()).unwrap();
        let id = tenant.id();
        db.save_tenant(&mut tenant);
        uow.save_changes().await.unwrap();
        uow.commit().await.unwrap();
        id
    }

    // ===== CreateTenant Tests =====

    #[tokio::test]
    async fn test_create_returns_a_fresh_id() {
        let db = Arc::new(MemoryDb::new());
        let request = CreateTenant {
            request_id: RequestId::new(),
            name: "Acme".into(),
        };

        let outcome = CreateTenantHandler.execute(&request, &ctx(&db)).await;

        let id = outcome.value().copied().unwrap();
        assert!(!id.is_nil());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name_ignoring_case() {
        let db = Arc::new(MemoryDb::new());
        seed(&db, "Acme").await;

        let request = CreateTenant {
            request_id: RequestId::new(),
            name: " ACME ".into(),
        };
        let outcome = CreateTenantHandler.execute(&request, &ctx(&db)).await;

        let err = &outcome.errors()[0];
        assert_eq!(err.category, ErrorCategory::Conflict);
        assert_eq!(err.code, "tenant.duplicate_name");
    }

    #[tokio::test]
    async fn test_create_surfaces_domain_rules_as_validation() {
        let db = Arc::new(MemoryDb::new());
        let request = CreateTenant {
            request_id: RequestId::new(),
            name: "   ".into(),
        };

        let outcome = CreateTenantHandler.execute(&request, &ctx(&db)).await;

        let err = &outcome.errors()[0];
        assert_eq!(err.category, ErrorCategory::Validation);
        assert_eq!(err.children.len(), 1);
    }

    // ===== RenameTenant Tests =====

    #[tokio::test]
    async fn test_rename_unknown_tenant_is_not_found() {
        let db = Arc::new(MemoryDb::new());
        let request = RenameTenant {
            id: TenantId::new(),
            name: "Acme".into(),
        };

        let outcome = RenameTenantHandler.execute(&request, &ctx(&db)).await;

        assert_eq!(outcome.errors()[0].code, "tenant.not_found");
    }

    #[tokio::test]
    async fn test_rename_to_another_tenants_name_conflicts() {
        let db = Arc::new(MemoryDb::new());
        let id = seed(&db, "Acme").await;
        seed(&db, "Globex").await;

        let request = RenameTenant {
            id,
            name: "globex".into(),
        };
        let outcome = RenameTenantHandler.execute(&request, &ctx(&db)).await;

        assert_eq!(outcome.errors()[0].code, "tenant.duplicate_name");
    }

    #[tokio::test]
    async fn test_rename_to_own_name_succeeds() {
        let db = Arc::new(MemoryDb::new());
        let id = seed(&db, "Acme").await;

        let request = RenameTenant {
            id,
            name: "Acme".into(),
        };
        let outcome = RenameTenantHandler.execute(&request, &ctx(&db)).await;

        assert!(outcome.is_success());
    }

    // ===== Delete / Restore Tests =====

    #[tokio::test]
    async fn test_delete_unknown_tenant_is_not_found() {
        let db = Arc::new(MemoryDb::new());
        let request = DeleteTenant { id: TenantId::new() };

        let outcome = DeleteTenantHandler.execute(&request, &ctx(&db)).await;

        assert_eq!(outcome.errors()[0].category, ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_delete_seeded_tenant_succeeds() {
        let db = Arc::new(MemoryDb::new());
        let id = seed(&db, "Acme").await;

        let outcome = DeleteTenantHandler.execute(&DeleteTenant { id }, &ctx(&db)).await;

        assert!(outcome.is_success());
    }

    // ===== Validator Tests =====

    #[test]
    fn test_create_tenant_rules_flag_blank_names() {
        let request = CreateTenant {
            request_id: RequestId::new(),
            name: "  ".into(),
        };
        assert_eq!(create_tenant_rules(&request).len(), 1);

        let request = CreateTenant {
            request_id: RequestId::new(),
            name: "Acme".into(),
        };
        assert!(create_tenant_rules(&request).is_empty());
    }
}
