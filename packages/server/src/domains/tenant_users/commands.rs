//! Tenant-user commands and their handlers.

use async_trait::async_trait;
use conveyor::{
    Command, ErrorInfo, FieldError, Handler, Outcome, Request, RequestContext, RequestId,
    WithRequestId,
};
use serde::{Deserialize, Serialize};

use crate::common::{TenantId, TenantUserId};
use crate::domains::tenant_users::tenant_user::{email_rule, user_name_rule, TenantUser};
use crate::kernel::{request_actor, ServerDeps};

// =============================================================================
// Requests
// =============================================================================

/// Add a member to a tenant. Idempotent: a retry with the same `request_id`
/// replays the first outcome instead of adding a second membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTenantUser {
    /// Caller-supplied identity of this logical operation.
    pub request_id: RequestId,
    pub tenant_id: TenantId,
    pub user_name: String,
    pub email: String,
}

impl Request for AddTenantUser {
    type Output = TenantUserId;
}

impl Command for AddTenantUser {}

impl WithRequestId for AddTenantUser {
    fn request_id(&self) -> RequestId {
        self.request_id
    }
}

/// Change a member's email address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeTenantUserEmail {
    pub id: TenantUserId,
    pub email: String,
}

impl Request for ChangeTenantUserEmail {
    type Output = ();
}

impl Command for ChangeTenantUserEmail {}

// =============================================================================
// Request validators
// =============================================================================

/// Identity rules for `AddTenantUser`, registered as a request validator.
/// Both fields are checked so the caller sees every violation at once.
pub fn add_tenant_user_rules(request: &AddTenantUser) -> Vec<FieldError> {
    let mut rules = Vec::new();
    rules.extend(user_name_rule(&request.user_name));
    rules.extend(email_rule(&request.email));
    rules
}

/// Email rule for `ChangeTenantUserEmail`, registered as a request validator.
pub fn change_email_rules(request: &ChangeTenantUserEmail) -> Vec<FieldError> {
    email_rule(&request.email).into_iter().collect()
}

// =============================================================================
// Handlers
// =============================================================================

pub struct AddTenantUserHandler;

#[async_trait]
impl Handler<AddTenantUser, ServerDeps> for AddTenantUserHandler {
    async fn execute(
        &self,
        request: &AddTenantUser,
        ctx: &RequestContext<ServerDeps>,
    ) -> Outcome<TenantUserId> {
        let db = &ctx.deps().db;

        let tenant = db.get_tenant(request.tenant_id).filter(|t| !t.is_deleted());
        if tenant.is_none() {
            return Outcome::failure(ErrorInfo::not_found(
                "tenant.not_found",
                format!("no tenant with id {}", request.tenant_id),
            ));
        }

        if db
            .find_tenant_user_by_name(request.tenant_id, &request.user_name)
            .is_some()
        {
            return Outcome::failure(ErrorInfo::conflict(
                "tenant_user.duplicate_user_name",
                format!(
                    "\"{}\" is already taken in this tenant",
                    request.user_name.trim()
                ),
            ));
        }

        let created = TenantUser::create(
            request.tenant_id,
            &request.user_name,
            &request.email,
            request_actor(ctx),
        );
        let mut user = match created {
            Ok(user) => user,
            Err(err) => return Outcome::failure(err),
        };
        let id = user.id();
        db.save_tenant_user(&mut user);
        Outcome::success(id)
    }
}

pub struct ChangeTenantUserEmailHandler;

#[async_trait]
impl Handler<ChangeTenantUserEmail, ServerDeps> for ChangeTenantUserEmailHandler {
    async fn execute(
        &self,
        request: &ChangeTenantUserEmail,
        ctx: &RequestContext<ServerDeps>,
    ) -> Outcome<()> {
        let db = &ctx.deps().db;
        let found = db.get_tenant_user(request.id).filter(|u| !u.is_deleted());
        let Some(mut user) = found else {
            return Outcome::failure(ErrorInfo::not_found(
                "tenant_user.not_found",
                format!("no tenant user with id {}", request.id),
            ));
        };

        match user.set_email(&request.email, request_actor(ctx)) {
            Ok(changed) => {
                if changed {
                    db.save_tenant_user(&mut user);
                }
                Outcome::success(())
            }
            Err(err) => Outcome::failure(err),
        }
    }
}
