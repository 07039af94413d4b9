//! The pipeline: registration, routing, and behavior composition.
//!
//! A [`Pipeline`] maps request types to handlers and wraps each dispatch
//! in the behavior chain for its category. The chain is fixed at
//! registration time - there is no runtime capability discovery, which
//! keeps every dispatch's shape knowable from the registration call alone:
//!
//! ```text
//! register_command:            validation > trace > transaction > handler
//! register_idempotent_command: validation > trace > transaction > idempotency > handler
//! register_query:              validation > trace > handler
//! register_cached_query:       validation > trace > cache > handler
//! ```
//!
//! # Guarantees
//!
//! 1. One handler per request type; duplicates are rejected at
//!    registration, not discovered at dispatch.
//! 2. A dispatch returns `Err(PipelineError)` only for wiring mistakes
//!    (no handler registered). Everything that happens while executing -
//!    business failures, faults, panics, cancellation - comes back as a
//!    typed `Outcome`.
//! 3. Panics are contained at the route boundary: after the inner layers
//!    have rolled back and released their claims, the caller sees an
//!    `Exception` failure, never an unwinding thread.
//! 4. An idempotent command whose overall outcome failed after the claim
//!    was taken (commit fault, cancellation, panic) has its record
//!    removed, so the caller can retry with the same request id.
//!
//! # Example
//!
//! ```ignore
//! use conveyor::{Pipeline, Submission};
//!
//! let pipeline = Pipeline::new(AppDeps::new())
//!     .with_unit_of_work(Arc::new(PgUnitOfWorkFactory::new(pool)))
//!     .register_validator::<CreateTenant>(create_tenant_rules)
//!     .register_idempotent_command(CreateTenantHandler)
//!     .register_cached_query(GetTenantHandler);
//!
//! let outcome = pipeline.send(CreateTenant { request_id, name }).await?;
//! ```

use std::any::{Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{CacheBehavior, InMemoryCache, ResponseCache};
use crate::context::{cancelled_outcome, RequestContext, Submission};
use crate::error::{codes, panic_summary, ErrorInfo, PipelineError};
use crate::handler::{Handler, Next};
use crate::idempotency::{
    IdempotencyBehavior, IdempotencyKey, IdempotencyStore, InMemoryIdempotencyStore,
};
use crate::outcome::Outcome;
use crate::request::{CacheableQuery, Command, Query, Request, WithRequestId, DEFAULT_CACHE_TTL};
use crate::trace::{TraceBehavior, TraceSink, TracingSink};
use crate::transaction::{NoOpUnitOfWork, TransactionBehavior, UnitOfWorkFactory};
use crate::validate::{Validate, ValidationBehavior};

// =============================================================================
// Pipeline
// =============================================================================

/// Routes typed requests through their behavior chains to handlers.
///
/// Built once at startup, then shared. Registration is chainable and
/// panics on duplicates (`try_` variants return the error instead);
/// stores and sinks default to in-process implementations until replaced
/// with `with_*`.
pub struct Pipeline<D> {
    deps: Arc<D>,
    routes: HashMap<TypeId, Box<dyn AnyRoute<D>>>,
    validators: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    idempotency: Arc<dyn IdempotencyStore>,
    cache: Arc<dyn ResponseCache>,
    unit_of_work: Arc<dyn UnitOfWorkFactory>,
    tracer: Arc<dyn TraceSink>,
}

impl<D: Send + Sync + 'static> Pipeline<D> {
    /// A pipeline over the given dependency container, with in-memory
    /// stores, no-op transactions, and `tracing`-backed spans.
    pub fn new(deps: D) -> Self {
        Self {
            deps: Arc::new(deps),
            routes: HashMap::new(),
            validators: HashMap::new(),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            cache: Arc::new(InMemoryCache::new()),
            unit_of_work: Arc::new(NoOpUnitOfWork),
            tracer: Arc::new(TracingSink),
        }
    }

    /// The shared dependency container.
    pub fn deps(&self) -> &D {
        &self.deps
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Replace the idempotency store.
    pub fn with_idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = store;
        self
    }

    /// Replace the response cache.
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the unit of work factory commands run under.
    pub fn with_unit_of_work(mut self, factory: Arc<dyn UnitOfWorkFactory>) -> Self {
        self.unit_of_work = factory;
        self
    }

    /// Replace the trace sink.
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.tracer = sink;
        self
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a command handler.
    ///
    /// # Panics
    ///
    /// Panics if a handler for `C` is already registered.
    pub fn register_command<C>(mut self, handler: impl Handler<C, D> + 'static) -> Self
    where
        C: Command,
    {
        if let Err(err) = self.try_register_command(handler) {
            panic!("{err}");
        }
        self
    }

    /// Fallible form of [`register_command`](Self::register_command).
    pub fn try_register_command<C>(
        &mut self,
        handler: impl Handler<C, D> + 'static,
    ) -> Result<(), PipelineError>
    where
        C: Command,
    {
        self.insert_route::<C>(Box::new(CommandRoute {
            handler: Arc::new(handler),
        }))
    }

    /// Register a command handler with idempotent execution.
    ///
    /// The command carries a request id, and its output must serialize so
    /// completed results can be stored and replayed.
    ///
    /// # Panics
    ///
    /// Panics if a handler for `C` is already registered.
    pub fn register_idempotent_command<C>(mut self, handler: impl Handler<C, D> + 'static) -> Self
    where
        C: WithRequestId,
        C::Output: Serialize + DeserializeOwned,
    {
        if let Err(err) = self.try_register_idempotent_command(handler) {
            panic!("{err}");
        }
        self
    }

    /// Fallible form of
    /// [`register_idempotent_command`](Self::register_idempotent_command).
    pub fn try_register_idempotent_command<C>(
        &mut self,
        handler: impl Handler<C, D> + 'static,
    ) -> Result<(), PipelineError>
    where
        C: WithRequestId,
        C::Output: Serialize + DeserializeOwned,
    {
        self.insert_route::<C>(Box::new(IdempotentCommandRoute {
            handler: Arc::new(handler),
        }))
    }

    /// Register a query handler.
    ///
    /// # Panics
    ///
    /// Panics if a handler for `Q` is already registered.
    pub fn register_query<Q>(mut self, handler: impl Handler<Q, D> + 'static) -> Self
    where
        Q: Query,
    {
        if let Err(err) = self.try_register_query(handler) {
            panic!("{err}");
        }
        self
    }

    /// Fallible form of [`register_query`](Self::register_query).
    pub fn try_register_query<Q>(
        &mut self,
        handler: impl Handler<Q, D> + 'static,
    ) -> Result<(), PipelineError>
    where
        Q: Query,
    {
        self.insert_route::<Q>(Box::new(QueryRoute {
            handler: Arc::new(handler),
        }))
    }

    /// Register a query handler with response caching.
    ///
    /// # Panics
    ///
    /// Panics if a handler for `Q` is already registered.
    pub fn register_cached_query<Q>(mut self, handler: impl Handler<Q, D> + 'static) -> Self
    where
        Q: CacheableQuery,
        Q::Output: Serialize + DeserializeOwned,
    {
        if let Err(err) = self.try_register_cached_query(handler) {
            panic!("{err}");
        }
        self
    }

    /// Fallible form of
    /// [`register_cached_query`](Self::register_cached_query).
    pub fn try_register_cached_query<Q>(
        &mut self,
        handler: impl Handler<Q, D> + 'static,
    ) -> Result<(), PipelineError>
    where
        Q: CacheableQuery,
        Q::Output: Serialize + DeserializeOwned,
    {
        self.insert_route::<Q>(Box::new(CachedQueryRoute {
            handler: Arc::new(handler),
        }))
    }

    /// Register a validator for a request type.
    ///
    /// Any number of validators may be registered per type, in any order
    /// relative to the handler; they all run on every dispatch of `R`.
    pub fn register_validator<R>(mut self, validator: impl Validate<R> + 'static) -> Self
    where
        R: Request,
    {
        let slot = self
            .validators
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::<Vec<Arc<dyn Validate<R>>>>::default());
        if let Some(list) = slot.downcast_mut::<Vec<Arc<dyn Validate<R>>>>() {
            list.push(Arc::new(validator));
        }
        self
    }

    fn insert_route<R: Request>(
        &mut self,
        route: Box<dyn AnyRoute<D>>,
    ) -> Result<(), PipelineError> {
        match self.routes.entry(TypeId::of::<R>()) {
            Entry::Occupied(_) => Err(PipelineError::HandlerAlreadyRegistered {
                type_name: R::name(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(route);
                Ok(())
            }
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatch a request with default submission options.
    pub async fn send<R: Request>(&self, request: R) -> Result<Outcome<R::Output>, PipelineError> {
        self.send_with(request, Submission::default()).await
    }

    /// Dispatch a request with a cancellation token and caller identity.
    pub async fn send_with<R: Request>(
        &self,
        request: R,
        submission: Submission,
    ) -> Result<Outcome<R::Output>, PipelineError> {
        let route = self
            .routes
            .get(&TypeId::of::<R>())
            .ok_or(PipelineError::HandlerNotFound {
                type_name: R::name(),
            })?;

        let validators: Vec<Arc<dyn Validate<R>>> = self
            .validators
            .get(&TypeId::of::<R>())
            .and_then(|slot| slot.downcast_ref::<Vec<Arc<dyn Validate<R>>>>())
            .cloned()
            .unwrap_or_default();

        let services = RouteServices {
            deps: self.deps.clone(),
            idempotency: self.idempotency.clone(),
            cache: self.cache.clone(),
            unit_of_work: self.unit_of_work.clone(),
            tracer: self.tracer.clone(),
        };

        let output = route
            .run(Box::new(request), Box::new(validators), services, submission)
            .await;

        output
            .downcast::<Outcome<R::Output>>()
            .map(|outcome| *outcome)
            .map_err(|_| PipelineError::OutputMismatch {
                type_name: R::name(),
            })
    }
}

impl<D> std::fmt::Debug for Pipeline<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("routes", &self.routes.len())
            .field("validator_sets", &self.validators.len())
            .finish()
    }
}

// =============================================================================
// Routes
// =============================================================================

/// Shared services handed to a route for one dispatch.
struct RouteServices<D> {
    deps: Arc<D>,
    idempotency: Arc<dyn IdempotencyStore>,
    cache: Arc<dyn ResponseCache>,
    unit_of_work: Arc<dyn UnitOfWorkFactory>,
    tracer: Arc<dyn TraceSink>,
}

/// Type-erased route: the request and outcome cross as `Any` so routes
/// for different request types live in one map.
trait AnyRoute<D>: Send + Sync {
    fn run(
        &self,
        request: Box<dyn Any + Send>,
        validators: Box<dyn Any + Send>,
        services: RouteServices<D>,
        submission: Submission,
    ) -> BoxFuture<'static, Box<dyn Any + Send>>;
}

struct CommandRoute<C: Request, D> {
    handler: Arc<dyn Handler<C, D>>,
}

impl<C, D> AnyRoute<D> for CommandRoute<C, D>
where
    C: Command,
    D: Send + Sync + 'static,
{
    fn run(
        &self,
        request: Box<dyn Any + Send>,
        validators: Box<dyn Any + Send>,
        services: RouteServices<D>,
        submission: Submission,
    ) -> BoxFuture<'static, Box<dyn Any + Send>> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let request = match request.downcast::<C>() {
                Ok(request) => *request,
                Err(_) => return mismatched_request(),
            };
            let validators = typed_validators::<C>(validators);
            let ctx = RequestContext::new(services.deps.clone(), submission);

            if ctx.is_cancelled() {
                return boxed_outcome(cancelled_outcome::<C::Output>());
            }

            let validation = ValidationBehavior::new(validators);
            let trace = TraceBehavior::new(services.tracer.clone());
            let transaction = TransactionBehavior::new(services.unit_of_work.clone());

            let outcome = contain_panic(
                C::name(),
                validation.handle(
                    &request,
                    Next::new(|| {
                        Box::pin(trace.handle(
                            C::name(),
                            ctx.user(),
                            Next::new(|| {
                                Box::pin(transaction.handle(
                                    ctx.cancellation(),
                                    Next::new(|| handler.execute(&request, &ctx)),
                                ))
                            }),
                        ))
                    }),
                ),
            )
            .await;

            boxed_outcome(outcome)
        })
    }
}

struct IdempotentCommandRoute<C: Request, D> {
    handler: Arc<dyn Handler<C, D>>,
}

impl<C, D> AnyRoute<D> for IdempotentCommandRoute<C, D>
where
    C: WithRequestId,
    C::Output: Serialize + DeserializeOwned,
    D: Send + Sync + 'static,
{
    fn run(
        &self,
        request: Box<dyn Any + Send>,
        validators: Box<dyn Any + Send>,
        services: RouteServices<D>,
        submission: Submission,
    ) -> BoxFuture<'static, Box<dyn Any + Send>> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let request = match request.downcast::<C>() {
                Ok(request) => *request,
                Err(_) => return mismatched_request(),
            };
            let validators = typed_validators::<C>(validators);
            let ctx = RequestContext::new(services.deps.clone(), submission);

            if ctx.is_cancelled() {
                return boxed_outcome(cancelled_outcome::<C::Output>());
            }

            let key = IdempotencyKey::for_request(&request);
            let validation = ValidationBehavior::new(validators);
            let trace = TraceBehavior::new(services.tracer.clone());
            let transaction = TransactionBehavior::new(services.unit_of_work.clone());
            let idempotency = IdempotencyBehavior::new(services.idempotency.clone());

            let outcome = contain_panic(
                C::name(),
                validation.handle(
                    &request,
                    Next::new(|| {
                        Box::pin(trace.handle(
                            C::name(),
                            ctx.user(),
                            Next::new(|| {
                                Box::pin(transaction.handle(
                                    ctx.cancellation(),
                                    Next::new(|| {
                                        Box::pin(idempotency.handle(
                                            &key,
                                            Next::new(|| handler.execute(&request, &ctx)),
                                        ))
                                    }),
                                ))
                            }),
                        ))
                    }),
                ),
            )
            .await;

            // A failed overall outcome while this dispatch holds the claim
            // means an outer layer (commit, cancellation, panic containment)
            // failed after the inner chain completed; remove the record so
            // the same request id can be retried.
            if outcome.is_failure() && idempotency.claimed() {
                if let Err(err) = services.idempotency.remove(&key).await {
                    tracing::error!(
                        key = %key,
                        error = %format!("{err:#}"),
                        "failed to clean up idempotency record"
                    );
                }
            }

            boxed_outcome(outcome)
        })
    }
}

struct QueryRoute<Q: Request, D> {
    handler: Arc<dyn Handler<Q, D>>,
}

impl<Q, D> AnyRoute<D> for QueryRoute<Q, D>
where
    Q: Query,
    D: Send + Sync + 'static,
{
    fn run(
        &self,
        request: Box<dyn Any + Send>,
        validators: Box<dyn Any + Send>,
        services: RouteServices<D>,
        submission: Submission,
    ) -> BoxFuture<'static, Box<dyn Any + Send>> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let request = match request.downcast::<Q>() {
                Ok(request) => *request,
                Err(_) => return mismatched_request(),
            };
            let validators = typed_validators::<Q>(validators);
            let ctx = RequestContext::new(services.deps.clone(), submission);

            if ctx.is_cancelled() {
                return boxed_outcome(cancelled_outcome::<Q::Output>());
            }

            let validation = ValidationBehavior::new(validators);
            let trace = TraceBehavior::new(services.tracer.clone());

            let outcome = contain_panic(
                Q::name(),
                validation.handle(
                    &request,
                    Next::new(|| {
                        Box::pin(trace.handle(
                            Q::name(),
                            ctx.user(),
                            Next::new(|| handler.execute(&request, &ctx)),
                        ))
                    }),
                ),
            )
            .await;

            boxed_outcome(outcome)
        })
    }
}

struct CachedQueryRoute<Q: Request, D> {
    handler: Arc<dyn Handler<Q, D>>,
}

impl<Q, D> AnyRoute<D> for CachedQueryRoute<Q, D>
where
    Q: CacheableQuery,
    Q::Output: Serialize + DeserializeOwned,
    D: Send + Sync + 'static,
{
    fn run(
        &self,
        request: Box<dyn Any + Send>,
        validators: Box<dyn Any + Send>,
        services: RouteServices<D>,
        submission: Submission,
    ) -> BoxFuture<'static, Box<dyn Any + Send>> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let request = match request.downcast::<Q>() {
                Ok(request) => *request,
                Err(_) => return mismatched_request(),
            };
            let validators = typed_validators::<Q>(validators);
            let ctx = RequestContext::new(services.deps.clone(), submission);

            if ctx.is_cancelled() {
                return boxed_outcome(cancelled_outcome::<Q::Output>());
            }

            let cache_key = request.cache_key();
            let ttl = request.cache_ttl().unwrap_or(DEFAULT_CACHE_TTL);
            let validation = ValidationBehavior::new(validators);
            let trace = TraceBehavior::new(services.tracer.clone());
            let cache = CacheBehavior::new(services.cache.clone());

            let outcome = contain_panic(
                Q::name(),
                validation.handle(
                    &request,
                    Next::new(|| {
                        Box::pin(trace.handle(
                            Q::name(),
                            ctx.user(),
                            Next::new(|| {
                                Box::pin(cache.handle(
                                    &cache_key,
                                    ttl,
                                    Next::new(|| handler.execute(&request, &ctx)),
                                ))
                            }),
                        ))
                    }),
                ),
            )
            .await;

            boxed_outcome(outcome)
        })
    }
}

// =============================================================================
// Route Helpers
// =============================================================================

fn boxed_outcome<T: Send + 'static>(outcome: Outcome<T>) -> Box<dyn Any + Send> {
    Box::new(outcome)
}

/// Returned when a route receives a request of the wrong type; surfaces
/// at the dispatch boundary as `PipelineError::OutputMismatch`.
fn mismatched_request() -> Box<dyn Any + Send> {
    Box::new(())
}

fn typed_validators<R: Request>(validators: Box<dyn Any + Send>) -> Vec<Arc<dyn Validate<R>>> {
    match validators.downcast::<Vec<Arc<dyn Validate<R>>>>() {
        Ok(list) => *list,
        Err(_) => Vec::new(),
    }
}

/// Convert an unwinding panic into an `Exception` failure once the inner
/// layers have finished their own cleanup.
async fn contain_panic<T>(
    request_name: &'static str,
    chain: impl Future<Output = Outcome<T>>,
) -> Outcome<T> {
    match AssertUnwindSafe(chain).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let summary = panic_summary(payload.as_ref());
            tracing::error!(request = request_name, panic = %summary, "request panicked");
            Outcome::failure(
                ErrorInfo::exception(codes::PANICKED, "the request panicked during execution")
                    .with_detail(serde_json::json!({ "panic": summary })),
            )
        }
    }
}
