//! Exactly-once command execution keyed by caller-supplied request ids.
//!
//! A record for an [`IdempotencyKey`] moves through three states:
//!
//! ```text
//! Absent ──mark_in_progress──▶ InProgress ──store_result──▶ Completed
//!    ▲                             │
//!    └──────────remove─────────────┘        (failures release the claim)
//! ```
//!
//! - `Completed` replays: the stored value is returned and the handler
//!   never runs again
//! - `InProgress` conflicts: a concurrent duplicate is told to retry later
//! - a failed execution releases its claim so the caller can retry with
//!   the same id
//!
//! The store is consulted before the claim is taken, so the winner of a
//! concurrent race is decided by [`IdempotencyStore::mark_in_progress`],
//! which must be atomic: exactly one caller gets `true`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{codes, ErrorInfo};
use crate::handler::Next;
use crate::outcome::Outcome;
use crate::request::{RequestId, WithRequestId};

// =============================================================================
// Idempotency Key
// =============================================================================

/// Identity of one logical command submission: request type plus the
/// caller-supplied [`RequestId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    /// Short request type name, scoping ids per command type.
    pub request_type: &'static str,
    /// The caller-supplied id.
    pub request_id: RequestId,
}

impl IdempotencyKey {
    /// Build a key from its parts.
    pub fn new(request_type: &'static str, request_id: RequestId) -> Self {
        Self {
            request_type,
            request_id,
        }
    }

    /// The key for a command that carries its own request id.
    pub fn for_request<C: WithRequestId>(request: &C) -> Self {
        Self::new(C::name(), request.request_id())
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.request_type, self.request_id)
    }
}

// =============================================================================
// Store Contract
// =============================================================================

/// Persistence for idempotency records.
///
/// Production stores may expire stale `InProgress` markers left behind by
/// crashed processes; the pipeline only requires the three-state protocol
/// and an atomic claim.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// The stored result for a completed execution, if one exists.
    async fn completed_result(
        &self,
        key: &IdempotencyKey,
    ) -> anyhow::Result<Option<serde_json::Value>>;

    /// Claim the key for this execution.
    ///
    /// Returns `true` when the claim was taken, `false` when any record
    /// (in progress or completed) already exists. Must be atomic under
    /// concurrent callers.
    async fn mark_in_progress(&self, key: &IdempotencyKey) -> anyhow::Result<bool>;

    /// Replace the claim with the completed result.
    async fn store_result(
        &self,
        key: &IdempotencyKey,
        result: serde_json::Value,
    ) -> anyhow::Result<()>;

    /// Delete whatever record exists for the key.
    async fn remove(&self, key: &IdempotencyKey) -> anyhow::Result<()>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

#[derive(Debug, Clone)]
enum StoredEntry {
    InProgress,
    Completed(serde_json::Value),
}

/// Process-local [`IdempotencyStore`] on a concurrent map.
///
/// The default store for a new pipeline. Suitable for single-process
/// deployments and tests; records do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    entries: DashMap<IdempotencyKey, StoredEntry>,
}

impl InMemoryIdempotencyStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records, in progress or completed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no records exist.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn completed_result(
        &self,
        key: &IdempotencyKey,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.entries.get(key).and_then(|entry| match entry.value() {
            StoredEntry::Completed(value) => Some(value.clone()),
            StoredEntry::InProgress => None,
        }))
    }

    async fn mark_in_progress(&self, key: &IdempotencyKey) -> anyhow::Result<bool> {
        match self.entries.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(StoredEntry::InProgress);
                Ok(true)
            }
        }
    }

    async fn store_result(
        &self,
        key: &IdempotencyKey,
        result: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.entries
            .insert(key.clone(), StoredEntry::Completed(result));
        Ok(())
    }

    async fn remove(&self, key: &IdempotencyKey) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// Idempotency Behavior
// =============================================================================

/// Replays completed results, claims the key, and releases the claim when
/// execution does not complete.
///
/// The `claimed` flag records whether this dispatch took the claim; the
/// route reads it afterwards to know whether a failed overall outcome
/// (for example a commit fault in the enclosing transaction) left a
/// record that must be cleaned up.
pub struct IdempotencyBehavior {
    store: Arc<dyn IdempotencyStore>,
    claimed: AtomicBool,
}

impl IdempotencyBehavior {
    /// Build from the configured store.
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            claimed: AtomicBool::new(false),
        }
    }

    /// True once this dispatch has taken the claim for its key.
    pub fn claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    /// Run the rest of the chain with replay and claim semantics.
    pub async fn handle<T>(&self, key: &IdempotencyKey, next: Next<'_, T>) -> Outcome<T>
    where
        T: Serialize + DeserializeOwned,
    {
        match self.store.completed_result(key).await {
            Err(err) => return store_unavailable(key, err),
            Ok(Some(stored)) => {
                // The record stays: it is the source of truth even when it
                // no longer decodes against the current output type.
                return match serde_json::from_value::<T>(stored) {
                    Ok(value) => Outcome::success(value),
                    Err(err) => Outcome::failure(
                        ErrorInfo::exception(
                            codes::IDEMPOTENCY_DECODE_ERROR,
                            "a stored result exists but could not be decoded",
                        )
                        .with_detail(serde_json::json!({
                            "key": key.to_string(),
                            "cause": err.to_string(),
                        })),
                    ),
                };
            }
            Ok(None) => {}
        }

        match self.store.mark_in_progress(key).await {
            Err(err) => return store_unavailable(key, err),
            Ok(false) => {
                return Outcome::failure(
                    ErrorInfo::conflict(
                        codes::IDEMPOTENCY_IN_PROGRESS,
                        "a submission with this request id is already being processed",
                    )
                    .with_detail(serde_json::json!({ "key": key.to_string() })),
                );
            }
            Ok(true) => self.claimed.store(true, Ordering::SeqCst),
        }

        let outcome = match AssertUnwindSafe(next.run()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.release(key).await;
                std::panic::resume_unwind(payload);
            }
        };

        match &outcome {
            Outcome::Success { value, .. } => match serde_json::to_value(value) {
                Ok(encoded) => {
                    if let Err(err) = self.store.store_result(key, encoded).await {
                        tracing::error!(
                            key = %key,
                            error = %format!("{err:#}"),
                            "failed to store idempotent result, releasing the claim"
                        );
                        self.release(key).await;
                    }
                }
                Err(err) => {
                    tracing::error!(
                        key = %key,
                        error = %err,
                        "idempotent result could not be encoded, releasing the claim"
                    );
                    self.release(key).await;
                }
            },
            Outcome::Failure(_) => self.release(key).await,
        }

        outcome
    }

    async fn release(&self, key: &IdempotencyKey) {
        if let Err(err) = self.store.remove(key).await {
            tracing::error!(
                key = %key,
                error = %format!("{err:#}"),
                "failed to release idempotency claim"
            );
        }
    }
}

fn store_unavailable<T>(key: &IdempotencyKey, err: anyhow::Error) -> Outcome<T> {
    Outcome::failure(
        ErrorInfo::exception(
            codes::IDEMPOTENCY_STORE_ERROR,
            "the idempotency store is unavailable",
        )
        .with_detail(serde_json::json!({
            "key": key.to_string(),
            "cause": format!("{err:#}"),
        })),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorCategory;

    fn key() -> IdempotencyKey {
        IdempotencyKey::new("CreateTenant", RequestId::new())
    }

    fn counting_next(value: u32, calls: &Arc<AtomicUsize>) -> Next<'static, u32> {
        let counted = calls.clone();
        Next::new(move || {
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Outcome::success(value)
            })
        })
    }

    struct BrokenStore;

    #[async_trait]
    impl IdempotencyStore for BrokenStore {
        async fn completed_result(
            &self,
            _key: &IdempotencyKey,
        ) -> anyhow::Result<Option<serde_json::Value>> {
            anyhow::bail!("store offline")
        }

        async fn mark_in_progress(&self, _key: &IdempotencyKey) -> anyhow::Result<bool> {
            anyhow::bail!("store offline")
        }

        async fn store_result(
            &self,
            _key: &IdempotencyKey,
            _result: serde_json::Value,
        ) -> anyhow::Result<()> {
            anyhow::bail!("store offline")
        }

        async fn remove(&self, _key: &IdempotencyKey) -> anyhow::Result<()> {
            anyhow::bail!("store offline")
        }
    }

    // =========================================================================
    // Store Tests
    // =========================================================================

    #[tokio::test]
    async fn test_store_claim_complete_remove_lifecycle() {
        let store = InMemoryIdempotencyStore::new();
        let key = key();

        assert_eq!(store.completed_result(&key).await.unwrap(), None);
        assert!(store.mark_in_progress(&key).await.unwrap());
        // A claim is not a completed result.
        assert_eq!(store.completed_result(&key).await.unwrap(), None);
        assert!(!store.mark_in_progress(&key).await.unwrap());

        store
            .store_result(&key, serde_json::json!(41))
            .await
            .unwrap();
        assert_eq!(
            store.completed_result(&key).await.unwrap(),
            Some(serde_json::json!(41))
        );

        store.remove(&key).await.unwrap();
        assert!(store.is_empty());
        assert!(store.mark_in_progress(&key).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_claims_have_exactly_one_winner() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let key = Arc::new(key());
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let key = key.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                tokio::time::sleep(Duration::from_millis(fastrand::u64(0..3))).await;
                store.mark_in_progress(&key).await.unwrap()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    // =========================================================================
    // Replay Tests
    // =========================================================================

    #[tokio::test]
    async fn test_completed_record_replays_without_running_the_chain() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let key = key();
        store
            .store_result(&key, serde_json::json!(7))
            .await
            .unwrap();

        let behavior = IdempotencyBehavior::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = behavior.handle(&key, counting_next(99, &calls)).await;

        assert_eq!(outcome.value(), Some(&7));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!behavior.claimed());
    }

    #[tokio::test]
    async fn test_undecodable_record_fails_and_is_kept() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let key = key();
        store
            .store_result(&key, serde_json::json!("not a number"))
            .await
            .unwrap();

        let behavior = IdempotencyBehavior::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = behavior.handle(&key, counting_next(99, &calls)).await;

        assert!(outcome.is_failure());
        assert_eq!(outcome.errors()[0].code, codes::IDEMPOTENCY_DECODE_ERROR);
        assert_eq!(outcome.errors()[0].category, ErrorCategory::Exception);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!behavior.claimed());
        // The record is still there for an operator to inspect.
        assert!(store.completed_result(&key).await.unwrap().is_some());
    }

    // =========================================================================
    // Claim Tests
    // =========================================================================

    #[tokio::test]
    async fn test_first_execution_stores_the_result() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let key = key();
        let behavior = IdempotencyBehavior::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = behavior.handle(&key, counting_next(5, &calls)).await;

        assert_eq!(outcome.value(), Some(&5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(behavior.claimed());
        assert_eq!(
            store.completed_result(&key).await.unwrap(),
            Some(serde_json::json!(5))
        );
    }

    #[tokio::test]
    async fn test_in_flight_duplicate_conflicts_without_running_the_chain() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let key = key();
        assert!(store.mark_in_progress(&key).await.unwrap());

        let behavior = IdempotencyBehavior::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = behavior.handle(&key, counting_next(5, &calls)).await;

        assert!(outcome.is_failure());
        assert_eq!(outcome.errors()[0].code, codes::IDEMPOTENCY_IN_PROGRESS);
        assert_eq!(outcome.errors()[0].category, ErrorCategory::Conflict);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!behavior.claimed());
    }

    #[tokio::test]
    async fn test_failed_execution_releases_the_claim() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let key = key();
        let behavior = IdempotencyBehavior::new(store.clone());

        let next: Next<'static, u32> = Next::new(|| {
            Box::pin(async {
                Outcome::failure(ErrorInfo::conflict("tenant.duplicate_name", "taken"))
            })
        });
        let outcome = behavior.handle(&key, next).await;

        assert!(outcome.is_failure());
        assert_eq!(outcome.errors()[0].code, "tenant.duplicate_name");
        assert!(behavior.claimed());
        // The claim is released, so a retry can take it again.
        assert!(store.mark_in_progress(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_panic_releases_the_claim_then_resumes() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let key = key();
        let behavior = IdempotencyBehavior::new(store.clone());
        let next: Next<'static, u32> =
            Next::new(|| Box::pin(async { panic!("handler exploded") }));

        let result = AssertUnwindSafe(behavior.handle(&key, next))
            .catch_unwind()
            .await;

        assert!(result.is_err());
        assert!(store.mark_in_progress(&key).await.unwrap());
    }

    // =========================================================================
    // Store Fault Tests
    // =========================================================================

    #[tokio::test]
    async fn test_unavailable_store_fails_closed() {
        let behavior = IdempotencyBehavior::new(Arc::new(BrokenStore));
        let key = key();
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = behavior.handle(&key, counting_next(5, &calls)).await;

        assert!(outcome.is_failure());
        assert_eq!(outcome.errors()[0].code, codes::IDEMPOTENCY_STORE_ERROR);
        assert_eq!(outcome.errors()[0].category, ErrorCategory::Exception);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
