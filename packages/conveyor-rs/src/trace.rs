//! Request tracing: one span per dispatch, injected as a capability.
//!
//! The pipeline never talks to a tracing backend directly. It talks to a
//! [`TraceSink`], which opens one [`TraceSpan`] per dispatch; the span
//! receives identity tags, lifecycle events, and a final status. The
//! production sink ([`TracingSink`]) maps all of that onto the `tracing`
//! ecosystem; tests swap in a recording sink and assert on what was
//! captured.
//!
//! The trace layer observes and never decides: outcomes pass through
//! untouched, and a panic is recorded on the span before it continues
//! unwinding to the containment boundary.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::context::UserContext;
use crate::error::panic_summary;
use crate::handler::Next;
use crate::outcome::Outcome;

// =============================================================================
// Sink Abstraction
// =============================================================================

/// Final disposition of a request span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    /// The request produced a success outcome.
    Ok,
    /// The request failed or panicked.
    Error,
}

/// Opens one span per dispatched request.
pub trait TraceSink: Send + Sync {
    /// Start a span named after the request type.
    fn start_span(&self, name: &str) -> Box<dyn TraceSpan>;
}

/// A live request span. Closed when dropped.
pub trait TraceSpan: Send {
    /// Attach a key/value tag.
    fn add_tag(&mut self, key: &str, value: &str);

    /// Record a point-in-time lifecycle event.
    fn add_event(&mut self, name: &str);

    /// Record the final status.
    fn set_status(&mut self, status: SpanStatus);
}

// =============================================================================
// Production Sink
// =============================================================================

/// [`TraceSink`] backed by the `tracing` crate.
///
/// Every dispatch becomes an `info`-level span named `request` with the
/// request type as a field. Tag keys are pre-declared as empty fields so
/// `Span::record` can fill them later.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

struct TracingSpan {
    span: tracing::Span,
}

impl TraceSink for TracingSink {
    fn start_span(&self, name: &str) -> Box<dyn TraceSpan> {
        let span = tracing::info_span!(
            "request",
            request = name,
            actor_id = tracing::field::Empty,
            tenant_id = tracing::field::Empty,
            error = tracing::field::Empty,
            panic = tracing::field::Empty,
            status = tracing::field::Empty,
        );
        Box::new(TracingSpan { span })
    }
}

impl TraceSpan for TracingSpan {
    fn add_tag(&mut self, key: &str, value: &str) {
        self.span.record(key, value);
    }

    fn add_event(&mut self, name: &str) {
        tracing::info!(parent: &self.span, event = name);
    }

    fn set_status(&mut self, status: SpanStatus) {
        let value = match status {
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
        };
        self.span.record("status", value);
    }
}

// =============================================================================
// Trace Behavior
// =============================================================================

/// Wraps the chain in a span with lifecycle events and caller identity.
pub struct TraceBehavior {
    sink: Arc<dyn TraceSink>,
}

impl TraceBehavior {
    /// Build from the configured sink.
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self { sink }
    }

    /// Run the rest of the chain inside a span.
    ///
    /// The outcome is returned exactly as produced. A panic is tagged on
    /// the span and then resumed for the route boundary to contain.
    pub async fn handle<T>(
        &self,
        request_name: &str,
        user: Option<&dyn UserContext>,
        next: Next<'_, T>,
    ) -> Outcome<T> {
        let mut span = self.sink.start_span(request_name);

        if let Some(user) = user {
            if let Some(id) = user.user_id() {
                span.add_tag("actor_id", &id.to_string());
            }
            if let Some(id) = user.tenant_id() {
                span.add_tag("tenant_id", &id.to_string());
            }
        }
        span.add_event("started");

        match AssertUnwindSafe(next.run()).catch_unwind().await {
            Ok(outcome) => {
                if outcome.is_success() {
                    span.add_event("succeeded");
                    span.set_status(SpanStatus::Ok);
                } else {
                    if let Some(primary) = outcome.errors().first() {
                        span.add_tag("error", &primary.summary());
                    }
                    span.add_event("failed");
                    span.set_status(SpanStatus::Error);
                }
                outcome
            }
            Err(payload) => {
                span.add_tag("panic", &panic_summary(payload.as_ref()));
                span.add_event("panicked");
                span.set_status(SpanStatus::Error);
                std::panic::resume_unwind(payload);
            }
        }
    }
}
