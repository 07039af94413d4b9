//! Server dependencies and pipeline wiring.
//!
//! `ServerDeps` is the dependency container every handler reaches through
//! its request context. `build_pipeline` is the one place handlers,
//! validators, and pipeline collaborators are registered; nothing wires
//! itself up anywhere else.

use std::sync::Arc;

use conveyor::{IdempotencyStore, Pipeline, RequestContext, ResponseCache, TraceSink};
use uuid::Uuid;

use crate::domains::tenant_users::commands::{
    add_tenant_user_rules, change_email_rules, AddTenantUserHandler, ChangeTenantUserEmailHandler,
};
use crate::domains::tenant_users::queries::GetTenantUserHandler;
use crate::domains::tenants::commands::{
    create_tenant_rules, rename_tenant_rules, CreateTenantHandler, DeleteTenantHandler,
    RenameTenantHandler, RestoreTenantHandler,
};
use crate::domains::tenants::queries::{GetTenantHandler, ListTenantsHandler};
use crate::kernel::memory::{MemoryDb, MemoryUnitOfWorkFactory};

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to handlers.
#[derive(Clone)]
pub struct ServerDeps {
    pub db: Arc<MemoryDb>,
}

impl ServerDeps {
    pub fn new(db: Arc<MemoryDb>) -> Self {
        Self { db }
    }
}

/// The acting user for audit stamps. Anonymous submissions act as the nil
/// user rather than failing, so unauthenticated callers still leave a trail.
pub fn request_actor(ctx: &RequestContext<ServerDeps>) -> Uuid {
    ctx.user()
        .and_then(|user| user.user_id())
        .unwrap_or_else(Uuid::nil)
}

// =============================================================================
// Pipeline wiring
// =============================================================================

/// Optional collaborator overrides for [`build_pipeline_with`].
///
/// Anything left `None` keeps the pipeline default. Tests use this to swap
/// in a recording trace sink or a shared idempotency store.
#[derive(Default)]
pub struct PipelineConfig {
    pub idempotency_store: Option<Arc<dyn IdempotencyStore>>,
    pub response_cache: Option<Arc<dyn ResponseCache>>,
    pub trace_sink: Option<Arc<dyn TraceSink>>,
}

/// A fully wired pipeline over the given dependencies.
pub fn build_pipeline(deps: ServerDeps) -> Pipeline<ServerDeps> {
    build_pipeline_with(deps, PipelineConfig::default())
}

/// [`build_pipeline`] with collaborator overrides.
pub fn build_pipeline_with(deps: ServerDeps, config: PipelineConfig) -> Pipeline<ServerDeps> {
    let unit_of_work = Arc::new(MemoryUnitOfWorkFactory::new(deps.db.clone()));

    let mut pipeline = Pipeline::new(deps).with_unit_of_work(unit_of_work);
    if let Some(store) = config.idempotency_store {
        pipeline = pipeline.with_idempotency_store(store);
    }
    if let Some(cache) = config.response_cache {
        pipeline = pipeline.with_cache(cache);
    }
    if let Some(sink) = config.trace_sink {
        pipeline = pipeline.with_trace_sink(sink);
    }

    pipeline
        // Tenants
        .register_idempotent_command(CreateTenantHandler)
        .register_command(RenameTenantHandler)
        .register_command(DeleteTenantHandler)
        .register_command(RestoreTenantHandler)
        .register_cached_query(GetTenantHandler)
        .register_query(ListTenantsHandler)
        .register_validator(create_tenant_rules)
        .register_validator(rename_tenant_rules)
        // Tenant users
        .register_idempotent_command(AddTenantUserHandler)
        .register_command(ChangeTenantUserEmailHandler)
        .register_query(GetTenantUserHandler)
        .register_validator(add_tenant_user_rules)
        .register_validator(change_email_rules)
}
