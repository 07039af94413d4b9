//! # Conveyor
//!
//! A typed request pipeline: commands and queries flow through a fixed
//! chain of behaviors to exactly one handler, and every dispatch comes
//! back as a structured [`Outcome`].
//!
//! ## Core Concepts
//!
//! - **Request**: a plain value implementing [`Request`] plus [`Command`]
//!   or [`Query`], fixing its output type at compile time
//! - **Handler**: the business logic for exactly one request type
//!   ([`Handler`])
//! - **Behavior**: a cross-cutting layer around the handler (validation,
//!   tracing, transactions, idempotency, caching); each receives the rest
//!   of the chain as a consumable [`Next`]
//! - **Outcome**: success with a value, or failure with a non-empty list
//!   of structured errors ([`Outcome`], [`ErrorInfo`])
//! - **Pipeline**: the registry that fixes the chain per request category
//!   and dispatches requests ([`Pipeline`])
//!
//! ## Architecture
//!
//! ```text
//!             Pipeline::send(request)
//!                       │
//!             ┌─────────▼─────────┐
//!             │    typed route    │   one per registered request type
//!             └─────────┬─────────┘
//!                       │
//!         Validation ── │ ── gate: aggregate field errors, or continue
//!                       │
//!              Trace ── │ ── span: identity tags, events, status
//!                       │
//!        Transaction ── │ ── commands: begin / save / commit / rollback
//!                       │
//!        Idempotency ── │ ── idempotent commands: replay, claim, store
//!                       │
//!              Cache ── │ ── cached queries: serve hits, store successes
//!                       │
//!            Handler ── ▼ ── the business logic
//!                       │
//!               Outcome<R::Output>
//! ```
//!
//! Each registration category uses a fixed subset of the chain; there is
//! no runtime capability discovery and no layer reordering.
//!
//! ## Key Invariants
//!
//! 1. **One handler per request type** - duplicates are rejected at
//!    registration time.
//! 2. **The chain order never varies** - validation, then tracing, then
//!    transaction, then idempotency or cache, then the handler.
//! 3. **`Next` runs at most once** - behaviors consume the continuation
//!    by value, so running the rest of the chain twice does not compile.
//! 4. **Failures explain themselves** - an [`ErrorList`] cannot be empty,
//!    by construction and by deserialization.
//! 5. **Panics stop at the dispatch boundary** - inner layers roll back
//!    and release claims while unwinding, then the caller receives an
//!    `Exception` failure.
//!
//! ## Guarantees
//!
//! - A replayed idempotent command returns a value equal to the first
//!   execution's, and the handler does not run again.
//! - A command whose unit of work fails to persist is rolled back, the
//!   caller sees a `General` failure, and no completed idempotency record
//!   survives, so the same request id can be retried.
//! - Only successes are cached; failures are recomputed on every call.
//! - A cancelled request is rolled back rather than half-persisted and
//!   reports `request.cancelled`.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use conveyor::{
//!     async_trait, Command, ErrorInfo, FieldError, Handler, Outcome, Pipeline,
//!     Request, RequestContext, RequestId, WithRequestId,
//! };
//!
//! struct AppDeps {
//!     tenants: TenantStore,
//! }
//!
//! #[derive(Clone)]
//! struct CreateTenant {
//!     request_id: RequestId,
//!     name: String,
//! }
//!
//! impl Request for CreateTenant {
//!     type Output = uuid::Uuid;
//! }
//!
//! impl Command for CreateTenant {}
//!
//! impl WithRequestId for CreateTenant {
//!     fn request_id(&self) -> RequestId {
//!         self.request_id
//!     }
//! }
//!
//! struct CreateTenantHandler;
//!
//! #[async_trait]
//! impl Handler<CreateTenant, AppDeps> for CreateTenantHandler {
//!     async fn execute(
//!         &self,
//!         request: &CreateTenant,
//!         ctx: &RequestContext<AppDeps>,
//!     ) -> Outcome<uuid::Uuid> {
//!         if ctx.deps().tenants.name_taken(&request.name).await {
//!             return Outcome::failure(ErrorInfo::conflict(
//!                 "tenant.duplicate_name",
//!                 "tenant name already in use",
//!             ));
//!         }
//!         Outcome::success(ctx.deps().tenants.insert(&request.name).await)
//!     }
//! }
//!
//! async fn run() {
//!     let pipeline = Pipeline::new(AppDeps::new())
//!         .register_validator::<CreateTenant>(|req: &CreateTenant| {
//!             if req.name.trim().is_empty() {
//!                 vec![FieldError::new("name", "must not be empty")]
//!             } else {
//!                 Vec::new()
//!             }
//!         })
//!         .register_idempotent_command(CreateTenantHandler);
//!
//!     let outcome = pipeline
//!         .send(CreateTenant {
//!             request_id: RequestId::new(),
//!             name: "Acme".to_string(),
//!         })
//!         .await
//!         .unwrap();
//!
//!     assert!(outcome.is_success());
//! }
//! ```
//!
//! ## What This Is Not
//!
//! - **Not a web framework** - map transports onto `send` at the edge.
//! - **Not a message bus** - dispatch is request/response, not pub/sub.
//! - **Not an ORM** - persistence stays behind [`UnitOfWork`] and the
//!   application's own repositories.
//! - **Not distributed** - the bundled stores are process-local; swap in
//!   shared implementations for multi-node deployments.

// Core modules
mod cache;
mod context;
mod entity;
mod error;
mod handler;
mod idempotency;
mod outcome;
mod pipeline;
mod request;
mod trace;
mod transaction;
mod validate;

// Test support, for this crate's own tests and for downstream crates via
// the `testing` feature
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export the outcome algebra
pub use error::{codes, ErrorCategory, ErrorInfo, FieldError, PipelineError};
pub use outcome::{ErrorList, Outcome};

// Re-export request traits and identity
pub use request::{
    CacheableQuery, Command, Query, Request, RequestId, WithRequestId, DEFAULT_CACHE_TTL,
};

// Re-export the dispatch surface
pub use context::{RequestContext, Submission, UserContext};
pub use handler::{Handler, Next};
pub use pipeline::Pipeline;

// Re-export behaviors and their collaborator contracts
pub use cache::{CacheBehavior, InMemoryCache, ResponseCache};
pub use idempotency::{
    IdempotencyBehavior, IdempotencyKey, IdempotencyStore, InMemoryIdempotencyStore,
};
pub use trace::{SpanStatus, TraceBehavior, TraceSink, TraceSpan, TracingSink};
pub use transaction::{NoOpUnitOfWork, TransactionBehavior, UnitOfWork, UnitOfWorkFactory};
pub use validate::{Validate, ValidationBehavior};

// Re-export entity building blocks
pub use entity::{Audit, DomainValidationError, EventBuffer};

// Re-export async_trait so handler impls don't need their own dependency
pub use async_trait::async_trait;
