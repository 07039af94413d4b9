//! Request traits: the typed contract between callers and handlers.
//!
//! Every dispatchable type implements [`Request`], which fixes the output
//! type at compile time, then picks a side: [`Command`] (writes) or
//! [`Query`] (reads). Two refinements opt into pipeline behaviors:
//!
//! - [`WithRequestId`]: commands that carry a caller-supplied [`RequestId`]
//!   and can therefore be registered as idempotent
//! - [`CacheableQuery`]: queries that name their own cache key and TTL
//!
//! The split is what lets the pipeline compose a fixed behavior chain per
//! category instead of discovering capabilities at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cache lifetime used when a [`CacheableQuery`] does not specify one.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

// =============================================================================
// Request Identity
// =============================================================================

/// Caller-supplied identity for an idempotent command submission.
///
/// Two submissions with the same `RequestId` and request type are the same
/// logical operation: the second observes the first's stored result instead
/// of re-executing. Serializes as a bare UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// A fresh random id. Callers generate one per logical operation and
    /// reuse it across retries.
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        RequestId(id)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RequestId(Uuid::parse_str(s)?))
    }
}

// =============================================================================
// Request Traits
// =============================================================================

/// A dispatchable request with a statically known output type.
///
/// Implementors are plain data: the pipeline borrows them immutably and all
/// state changes happen through the dependency container.
pub trait Request: Send + Sync + 'static {
    /// The value a successful outcome carries.
    type Output: Send + 'static;

    /// Short name used in spans, logs, and idempotency keys.
    ///
    /// Defaults to the unqualified type name.
    fn name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// A state-changing request. Runs inside a unit of work.
pub trait Command: Request {}

/// A read-only request. Never opens a unit of work.
pub trait Query: Request {}

/// A command that carries a caller-supplied [`RequestId`].
///
/// Required for [`register_idempotent_command`](crate::Pipeline::register_idempotent_command):
/// the id plus the request type name form the idempotency key.
pub trait WithRequestId: Command {
    /// The identity of this logical operation.
    fn request_id(&self) -> RequestId;
}

/// A query whose results may be served from a response cache.
///
/// The key must fully describe the inputs: two queries with equal keys are
/// assumed to have equal answers for the duration of the TTL.
pub trait CacheableQuery: Query {
    /// Cache key for this query's inputs.
    fn cache_key(&self) -> String;

    /// Cache lifetime; `None` selects [`DEFAULT_CACHE_TTL`].
    fn cache_ttl(&self) -> Option<Duration> {
        None
    }
}
