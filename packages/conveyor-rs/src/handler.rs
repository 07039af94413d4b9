//! Handlers and the continuation type behaviors wrap around them.
//!
//! A [`Handler`] owns the business logic for exactly one request type. It
//! sees the request and the [`RequestContext`] and returns an
//! [`Outcome`] - nothing about transactions, idempotency, caching, or
//! tracing leaks in. Those concerns wrap the handler as layers, and each
//! layer receives the rest of the chain as a [`Next`] continuation.
//!
//! `Next` is consumed by value. A behavior can run the rest of the chain
//! at most once, and skipping it (cache hit, idempotent replay, failed
//! validation) is as simple as dropping it.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::RequestContext;
use crate::outcome::Outcome;
use crate::request::Request;

/// Business logic for one request type.
///
/// Handlers are registered once at startup and shared across dispatches,
/// so they borrow themselves immutably; mutable state lives behind the
/// dependency container `D`.
///
/// # Example
///
/// ```ignore
/// use conveyor::{async_trait, Handler, Outcome, RequestContext};
///
/// struct CreateTenantHandler;
///
/// #[async_trait]
/// impl Handler<CreateTenant, AppDeps> for CreateTenantHandler {
///     async fn execute(
///         &self,
///         request: &CreateTenant,
///         ctx: &RequestContext<AppDeps>,
///     ) -> Outcome<TenantId> {
///         ctx.deps().tenants.create(&request.name).await
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<R: Request, D>: Send + Sync {
    /// Execute the request against the application's dependencies.
    async fn execute(&self, request: &R, ctx: &RequestContext<D>) -> Outcome<R::Output>;
}

/// The remainder of a behavior chain, runnable at most once.
///
/// Built by the pipeline when it composes a route; behaviors call
/// [`Next::run`] to continue inward or drop it to short-circuit.
pub struct Next<'a, T> {
    inner: Box<dyn FnOnce() -> BoxFuture<'a, Outcome<T>> + Send + 'a>,
}

impl<'a, T> Next<'a, T> {
    /// Wrap the rest of the chain.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'a, Outcome<T>> + Send + 'a,
    {
        Self {
            inner: Box::new(f),
        }
    }

    /// Run the rest of the chain. Consumes the continuation.
    pub async fn run(self) -> Outcome<T> {
        (self.inner)().await
    }
}

impl<T> std::fmt::Debug for Next<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Next")
    }
}
