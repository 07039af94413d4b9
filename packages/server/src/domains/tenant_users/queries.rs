//! Tenant-user queries and their handlers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor::{ErrorInfo, Handler, Outcome, Query, Request, RequestContext};
use serde::{Deserialize, Serialize};

use crate::common::{TenantId, TenantUserId};
use crate::domains::tenant_users::TenantUser;
use crate::kernel::ServerDeps;

/// What callers see of a membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantUserView {
    pub id: TenantUserId,
    pub tenant_id: TenantId,
    pub user_name: String,
    pub email: String,
    pub created_on: DateTime<Utc>,
    pub modified_on: Option<DateTime<Utc>>,
}

impl From<TenantUser> for TenantUserView {
    fn from(user: TenantUser) -> Self {
        Self {
            id: user.id(),
            tenant_id: user.tenant_id(),
            user_name: user.user_name().to_string(),
            email: user.email().to_string(),
            created_on: user.audit().created_on(),
            modified_on: user.audit().modified_on(),
        }
    }
}

/// Fetch one membership by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTenantUser {
    pub id: TenantUserId,
}

impl Request for GetTenantUser {
    type Output = TenantUserView;
}

impl Query for GetTenantUser {}

pub struct GetTenantUserHandler;

#[async_trait]
impl Handler<GetTenantUser, ServerDeps> for GetTenantUserHandler {
    async fn execute(
        &self,
        request: &GetTenantUser,
        ctx: &RequestContext<ServerDeps>,
    ) -> Outcome<TenantUserView> {
        let found = ctx
            .deps()
            .db
            .get_tenant_user(request.id)
            .filter(|u| !u.is_deleted());
        match found {
            Some(user) => Outcome::success(user.into()),
            None => Outcome::failure(ErrorInfo::not_found(
                "tenant_user.not_found",
                format!("no tenant user with id {}", request.id),
            )),
        }
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

    async fn seed_user(db: &Arc<MemoryDb>) -> TenantUserId {
        let mut uow = MemoryUnitOfWorkFactory::new(db.clone()).create();
        uow.begin().await.unwrap();
        let mut user = TenantUser::create(
            TenantId::new(),
            "casey.j",
            "casey@example.org",
            Uuid::new_v4(),
        )
        .unwrap();
        let id = user.id();
        db.save_tenant_user(&mut user);
        uow.save_changes().await.unwrap();
        uow.commit().await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_get_returns_the_view() {
        let db = Arc::new(MemoryDb::new());
        let id = seed_user(&db).await;

        let outcome = GetTenantUserHandler
            .execute(&GetTenantUser { id }, &ctx(&db))
            .await;

        let view = outcome.value().unwrap();
        assert_eq!(view.id, id);
        assert_eq!(view.user_name, "casey.j");
        assert_eq!(view.email, "casey@example.org");
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let db = Arc::new(MemoryDb::new());

        let outcome = GetTenantUserHandler
            .execute(
                &GetTenantUser {
                    id: TenantUserId::new(),
                },
                &ctx(&db),
            )
            .await;

        assert_eq!(outcome.errors()[0].category, ErrorCategory::NotFound);
    }
}
