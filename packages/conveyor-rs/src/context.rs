//! Per-dispatch context: dependencies, cancellation, and caller identity.
//!
//! A [`RequestContext`] is built by the pipeline for each dispatch and
//! borrowed by the handler. It bundles three things:
//!
//! - the shared dependency container (`Arc<D>`, the application decides
//!   what `D` is)
//! - a [`CancellationToken`] the caller may trip to abandon the request
//! - the authenticated [`UserContext`], when the caller supplied one
//!
//! [`Submission`] is the caller-side builder for the optional parts. A
//! plain `pipeline.send(request)` uses `Submission::default()`: a fresh
//! never-cancelled token and no user.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{codes, ErrorInfo};
use crate::outcome::Outcome;

// =============================================================================
// User Context
// =============================================================================

/// The authenticated caller, as the application understands it.
///
/// The pipeline only reads identity for span tags; authorization decisions
/// belong to validators and handlers.
pub trait UserContext: Send + Sync {
    /// Stable id of the acting user, if authenticated.
    fn user_id(&self) -> Option<Uuid>;

    /// Tenant the caller is acting within, if any.
    fn tenant_id(&self) -> Option<Uuid>;

    /// Role names granted to the caller.
    fn roles(&self) -> &[String] {
        &[]
    }

    /// Raw claims for rules the role list cannot express.
    fn claims(&self) -> &[(String, String)] {
        &[]
    }
}

// =============================================================================
// Submission
// =============================================================================

/// Caller-side options for one dispatch.
///
/// ```ignore
/// use conveyor::Submission;
/// use tokio_util::sync::CancellationToken;
///
/// let token = CancellationToken::new();
/// let outcome = pipeline
///     .send_with(request, Submission::new().with_cancellation(token.clone()))
///     .await?;
/// ```
#[derive(Default)]
pub struct Submission {
    cancellation: Option<CancellationToken>,
    user: Option<Arc<dyn UserContext>>,
}

impl Submission {
    /// An empty submission: fresh token, anonymous caller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cancellation token the caller controls.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Attach the authenticated caller.
    pub fn with_user(mut self, user: Arc<dyn UserContext>) -> Self {
        self.user = Some(user);
        self
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("has_cancellation", &self.cancellation.is_some())
            .field("has_user", &self.user.is_some())
            .finish()
    }
}

// =============================================================================
// Request Context
// =============================================================================

/// Everything a handler may touch besides the request itself.
pub struct RequestContext<D> {
    deps: Arc<D>,
    cancellation: CancellationToken,
    user: Option<Arc<dyn UserContext>>,
}

impl<D> RequestContext<D> {
    pub(crate) fn new(deps: Arc<D>, submission: Submission) -> Self {
        Self {
            deps,
            cancellation: submission.cancellation.unwrap_or_default(),
            user: submission.user,
        }
    }

    /// Build a context directly, bypassing the pipeline. Test use only.
    #[cfg(any(test, feature = "testing"))]
    pub fn for_testing(deps: Arc<D>) -> Self {
        Self::new(deps, Submission::default())
    }

    /// The shared dependency container.
    pub fn deps(&self) -> &D {
        &self.deps
    }

    /// The cancellation token for this dispatch.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// True once the caller has abandoned the request.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// The authenticated caller, if one was attached.
    pub fn user(&self) -> Option<&dyn UserContext> {
        self.user.as_deref()
    }
}

impl<D> std::fmt::Debug for RequestContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_user", &self.user.is_some())
            .finish()
    }
}

/// The failure every behavior returns when it observes a tripped token.
pub(crate) fn cancelled_outcome<T>() -> Outcome<T> {
    Outcome::failure(ErrorInfo::general(
        codes::CANCELLED,
        "request was cancelled before completion",
    ))
}
