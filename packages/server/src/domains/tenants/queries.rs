//! Tenant queries and their handlers.
//!
//! `GetTenant` is cached by id; a hit is served without running the handler,
//! so a view can be stale for up to the TTL after a rename or delete.
//! `ListTenants` is uncached and pages with opaque cursors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor::{CacheableQuery, ErrorInfo, Handler, Outcome, Query, Request, RequestContext};
use serde::{Deserialize, Serialize};

use crate::common::{Page, PageArgs, TenantId};
use crate::domains::tenants::Tenant;
use crate::kernel::ServerDeps;

/// What callers see of a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantView {
    pub id: TenantId,
    pub name: String,
    pub created_on: DateTime<Utc>,
    pub modified_on: Option<DateTime<Utc>>,
}

impl From<Tenant> for TenantView {
    fn from(tenant: Tenant) -> Self {
        Self {
            id: tenant.id(),
            name: tenant.name().to_string(),
            created_on: tenant.audit().created_on(),
            modified_on: tenant.audit().modified_on(),
        }
    }
}

// =============================================================================
// GetTenant
// =============================================================================

/// Fetch one tenant by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTenant {
    pub id: TenantId,
}

impl Request for GetTenant {
    type Output = TenantView;
}

impl Query for GetTenant {}

impl CacheableQuery for GetTenant {
    fn cache_key(&self) -> String {
        format!("tenant:{}", self.id)
    }
}

pub struct GetTenantHandler;

#[async_trait]
impl Handler<GetTenant, ServerDeps> for GetTenantHandler {
    async fn execute(
        &self,
        request: &GetTenant,
        ctx: &RequestContext<ServerDeps>,
    ) -> Outcome<TenantView> {
        let found = ctx
            .deps()
            .db
            .get_tenant(request.id)
            .filter(|t| !t.is_deleted());
        match found {
            Some(tenant) => Outcome::success(tenant.into()),
            None => Outcome::failure(ErrorInfo::not_found(
                "tenant.not_found",
                format!("no tenant with id {}", request.id),
            )),
        }
    }
}

// =============================================================================
// ListTenants
// =============================================================================

/// List live tenants, oldest first, one page at a time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTenants {
    pub page: PageArgs,
}

impl Request for ListTenants {
    type Output = Page<TenantView>;
}

impl Query for ListTenants {}

pub struct ListTenantsHandler;

#[async_trait]
impl Handler<ListTenants, ServerDeps> for ListTenantsHandler {
    async fn execute(
        &self,
        request: &ListTenants,
        ctx: &RequestContext<ServerDeps>,
    ) -> Outcome<Page<TenantView>> {
        let args = match request.page.validate() {
            Ok(args) => args,
            Err(reason) => {
                return Outcome::failure(ErrorInfo::validation(
                    "pagination.invalid_cursor",
                    reason,
                ))
            }
        };

        let rows: Vec<TenantView> = ctx
            .deps()
            .db
            .list_tenants(args.cursor, args.fetch_limit())
            .into_iter()
            .map(TenantView::from)
            .collect();
        Outcome::success(Page::from_rows(rows, &args, |view| *view.id.as_uuid()))
    }
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

    async fn soft_delete(db: &Arc<MemoryDb>, id: TenantId) {
        let mut uow = MemoryUnitOfWorkFactory::new(db.clone()).create();
        uow.begin().await.unwrap();
        let mut tenant = db.get_tenant(id).unwrap();
        tenant.delete(Uuid::new_v4());
        db.save_tenant(&mut tenant);
        uow.save_changes().await.unwrap();
        uow.commit().await.unwrap();
    }

    // ===== GetTenant Tests =====

    #[tokio::test]
    async fn test_get_returns_the_view() {
        let db = Arc::new(MemoryDb::new());
        let id = seed(&db, "Acme").await;

        let outcome = GetTenantHandler.execute(&GetTenant { id }, &ctx(&db)).await;

        let view = outcome.value().unwrap();
        assert_eq!(view.id, id);
        assert_eq!(view.name, "Acme");
        assert!(view.modified_on.is_none());
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let db = Arc::new(MemoryDb::new());

        let outcome = GetTenantHandler
            .execute(&GetTenant { id: TenantId::new() }, &ctx(&db))
            .await;

        assert_eq!(outcome.errors()[0].category, ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_get_deleted_is_not_found() {
        let db = Arc::new(MemoryDb::new());
        let id = seed(&db, "Acme").await;
        soft_delete(&db, id).await;

        let outcome = GetTenantHandler.execute(&GetTenant { id }, &ctx(&db)).await;

        assert_eq!(outcome.errors()[0].code, "tenant.not_found");
    }

    #[test]
    fn test_cache_key_is_scoped_by_id() {
        let id = TenantId::new();
        let query = GetTenant { id };
        assert_eq!(query.cache_key(), format!("tenant:{id}"));
    }

    // ===== ListTenants Tests =====

    #[tokio::test]
    async fn test_list_pages_through_all_tenants() {
        let db = Arc::new(MemoryDb::new());
        seed(&db, "One").await;
        seed(&db, "Two").await;
        seed(&db, "Three").await;

        let first = ListTenantsHandler
            .execute(
                &ListTenants {
                    page: PageArgs::forward(2, None),
                },
                &ctx(&db),
            )
            .await;
        let first = first.value().unwrap().clone();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_next);

        let second = ListTenantsHandler
            .execute(
                &ListTenants {
                    page: PageArgs::forward(2, first.end_cursor.clone()),
                },
                &ctx(&db),
            )
            .await;
        let second = second.value().unwrap().clone();
        assert_eq!(second.items.len(), 1);
        assert!(!second.has_next);
        assert_eq!(second.items[0].name, "Three");

        let past_the_end = ListTenantsHandler
            .execute(
                &ListTenants {
                    page: PageArgs::forward(2, second.end_cursor.clone()),
                },
                &ctx(&db),
            )
            .await;
        let past_the_end = past_the_end.value().unwrap().clone();
        assert!(past_the_end.items.is_empty());
        assert!(!past_the_end.has_next);
    }

    #[tokio::test]
    async fn test_list_excludes_deleted() {
        let db = Arc::new(MemoryDb::new());
        let id = seed(&db, "One").await;
        seed(&db, "Two").await;
        soft_delete(&db, id).await;

        let outcome = ListTenantsHandler
            .execute(&ListTenants::default(), &ctx(&db))
            .await;

        let page = outcome.value().unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "Two");
    }

    #[tokio::test]
    async fn test_list_rejects_bad_cursor() {
        let db = Arc::new(MemoryDb::new());

        let outcome = ListTenantsHandler
            .execute(
                &ListTenants {
                    page: PageArgs::forward(10, Some("not a cursor".into())),
                },
                &ctx(&db),
            )
            .await;

        let err = &outcome.errors()[0];
        assert_eq!(err.category, ErrorCategory::Validation);
        assert_eq!(err.code, "pagination.invalid_cursor");
    }
}
