//! Test doubles for pipeline collaborators.
//!
//! Everything here is deterministic and inspectable after the fact:
//! handlers built from closures, a scripted unit of work that logs its
//! protocol calls, a trace sink that keeps finished spans, and a canned
//! user identity. Enable with the `testing` feature (on by default for
//! this crate's own tests).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::context::{RequestContext, UserContext};
use crate::handler::Handler;
use crate::outcome::Outcome;
use crate::request::Request;
use crate::trace::{SpanStatus, TraceSink, TraceSpan};
use crate::transaction::{UnitOfWork, UnitOfWorkFactory};

// =============================================================================
// Handlers
// =============================================================================

/// A [`Handler`] built from a synchronous closure over the request.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    /// Wrap the closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<R, D, F> Handler<R, D> for FnHandler<F>
where
    R: Request,
    D: Send + Sync + 'static,
    F: Fn(&R) -> Outcome<R::Output> + Send + Sync,
{
    async fn execute(&self, request: &R, _ctx: &RequestContext<D>) -> Outcome<R::Output> {
        (self.f)(request)
    }
}

/// Wraps another handler and counts how many times it actually executes.
///
/// The counter is passed in so tests keep a handle to it after the
/// handler moves into the pipeline.
pub struct CountingHandler<H> {
    inner: H,
    calls: Arc<AtomicUsize>,
}

impl<H> CountingHandler<H> {
    /// Wrap `inner`, incrementing `calls` per execution.
    pub fn new(inner: H, calls: Arc<AtomicUsize>) -> Self {
        Self { inner, calls }
    }
}

#[async_trait]
impl<R, D, H> Handler<R, D> for CountingHandler<H>
where
    R: Request,
    D: Send + Sync + 'static,
    H: Handler<R, D>,
{
    async fn execute(&self, request: &R, ctx: &RequestContext<D>) -> Outcome<R::Output> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(request, ctx).await
    }
}

// =============================================================================
// Unit of Work
// =============================================================================

/// One protocol call observed by the [`FakeUnitOfWorkFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOp {
    Begin,
    SaveChanges,
    Commit,
    Rollback,
}

/// A [`UnitOfWorkFactory`] whose units log every call and can be told to
/// fail their next `begin`, `save_changes`, or `commit`.
///
/// Cloning shares the log and the fault switches, so the copy given to
/// the pipeline and the copy kept by the test observe the same state.
#[derive(Clone, Default)]
pub struct FakeUnitOfWorkFactory {
    log: Arc<Mutex<Vec<TxOp>>>,
    fail_begin: Arc<AtomicBool>,
    fail_save: Arc<AtomicBool>,
    fail_commit: Arc<AtomicBool>,
}

impl FakeUnitOfWorkFactory {
    /// A factory with no scripted faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `begin` fail.
    pub fn fail_next_begin(&self) {
        self.fail_begin.store(true, Ordering::SeqCst);
    }

    /// Make the next `save_changes` fail.
    pub fn fail_next_save_changes(&self) {
        self.fail_save.store(true, Ordering::SeqCst);
    }

    /// Make the next `commit` fail.
    pub fn fail_next_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    /// Every protocol call so far, across all created units, in order.
    pub fn ops(&self) -> Vec<TxOp> {
        self.log.lock().unwrap().clone()
    }
}

impl UnitOfWorkFactory for FakeUnitOfWorkFactory {
    fn create(&self) -> Box<dyn UnitOfWork> {
        Box::new(FakeUnitOfWork {
            log: self.log.clone(),
            fail_begin: self.fail_begin.clone(),
            fail_save: self.fail_save.clone(),
            fail_commit: self.fail_commit.clone(),
        })
    }
}

struct FakeUnitOfWork {
    log: Arc<Mutex<Vec<TxOp>>>,
    fail_begin: Arc<AtomicBool>,
    fail_save: Arc<AtomicBool>,
    fail_commit: Arc<AtomicBool>,
}

impl FakeUnitOfWork {
    fn record(&self, op: TxOp) {
        self.log.lock().unwrap().push(op);
    }
}

#[async_trait]
impl UnitOfWork for FakeUnitOfWork {
    async fn begin(&mut self) -> anyhow::Result<()> {
        self.record(TxOp::Begin);
        if self.fail_begin.swap(false, Ordering::SeqCst) {
            anyhow::bail!("injected begin fault");
        }
        Ok(())
    }

    async fn save_changes(&mut self) -> anyhow::Result<u64> {
        self.record(TxOp::SaveChanges);
        if self.fail_save.swap(false, Ordering::SeqCst) {
            anyhow::bail!("injected save fault");
        }
        Ok(1)
    }

    async fn commit(&mut self) -> anyhow::Result<()> {
        self.record(TxOp::Commit);
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            anyhow::bail!("injected commit fault");
        }
        Ok(())
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        self.record(TxOp::Rollback);
        Ok(())
    }
}

// =============================================================================
// Trace Sink
// =============================================================================

/// A finished span captured by the [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSpan {
    /// Request name the span was opened with.
    pub name: String,
    /// Tags in the order they were added.
    pub tags: Vec<(String, String)>,
    /// Lifecycle events in order.
    pub events: Vec<String>,
    /// Final status, if one was set.
    pub status: Option<SpanStatus>,
}

impl RecordedSpan {
    /// The value of a tag, if it was set.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A [`TraceSink`] that keeps every finished span for assertions.
///
/// Spans land in the sink when dropped, which also covers spans closed by
/// an unwinding panic.
#[derive(Default)]
pub struct RecordingSink {
    spans: Arc<Mutex<Vec<RecordedSpan>>>,
}

impl RecordingSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All finished spans so far.
    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.spans.lock().unwrap().clone()
    }
}

impl TraceSink for RecordingSink {
    fn start_span(&self, name: &str) -> Box<dyn TraceSpan> {
        Box::new(RecordingSpan {
            record: RecordedSpan {
                name: name.to_string(),
                tags: Vec::new(),
                events: Vec::new(),
                status: None,
            },
            sink: self.spans.clone(),
        })
    }
}

struct RecordingSpan {
    record: RecordedSpan,
    sink: Arc<Mutex<Vec<RecordedSpan>>>,
}

impl TraceSpan for RecordingSpan {
    fn add_tag(&mut self, key: &str, value: &str) {
        self.record.tags.push((key.to_string(), value.to_string()));
    }

    fn add_event(&mut self, name: &str) {
        self.record.events.push(name.to_string());
    }

    fn set_status(&mut self, status: SpanStatus) {
        self.record.status = Some(status);
    }
}

impl Drop for RecordingSpan {
    fn drop(&mut self) {
        if let Ok(mut spans) = self.sink.lock() {
            spans.push(self.record.clone());
        }
    }
}

// =============================================================================
// User Identity
// =============================================================================

/// A fixed [`UserContext`] for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticUser {
    user_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
    roles: Vec<String>,
    claims: Vec<(String, String)>,
}

impl StaticUser {
    /// An authenticated user with the given id.
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    /// An unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Act within a tenant.
    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Grant a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Attach a raw claim.
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push((key.into(), value.into()));
        self
    }
}

impl UserContext for StaticUser {
    fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    fn tenant_id(&self) -> Option<Uuid> {
        self.tenant_id
    }

    fn roles(&self) -> &[String] {
        &self.roles
    }

    fn claims(&self) -> &[(String, String)] {
        &self.claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(u32);

    impl Request for Echo {
        type Output = u32;
    }

    struct NoDeps;

    #[tokio::test]
    async fn test_fn_handler_and_counting_wrapper() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler::new(
            FnHandler::new(|request: &Echo| Outcome::success(request.0 * 2)),
            calls.clone(),
        );
        let ctx = RequestContext::for_testing(Arc::new(NoDeps));

        let outcome = handler.execute(&Echo(21), &ctx).await;

        assert_eq!(outcome.value(), Some(&42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recorded_span_tag_lookup() {
        let sink = RecordingSink::new();
        {
            let mut span = sink.start_span("GetTenant");
            span.add_tag("actor_id", "abc");
            span.set_status(SpanStatus::Ok);
        }

        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].tag("actor_id"), Some("abc"));
        assert_eq!(spans[0].tag("missing"), None);
    }

    #[test]
    fn test_static_user_builders() {
        let id = Uuid::new_v4();
        let user = StaticUser::new(id)
            .with_role("admin")
            .with_claim("plan", "enterprise");

        assert_eq!(user.user_id(), Some(id));
        assert_eq!(user.roles(), &["admin".to_string()]);
        assert_eq!(
            user.claims(),
            &[("plan".to_string(), "enterprise".to_string())]
        );
        assert_eq!(StaticUser::anonymous().user_id(), None);
    }
}
