//! Units of work: every command runs inside one.
//!
//! The pipeline does not know what a transaction is; it knows the
//! [`UnitOfWork`] protocol: `begin`, run the inner chain, then either
//! `save_changes` + `commit` (success) or `rollback` (anything else).
//! The application supplies a [`UnitOfWorkFactory`] - a database-backed
//! one in production, [`NoOpUnitOfWork`] when there is nothing
//! transactional to protect, a scripted fake in tests.
//!
//! Failure semantics are strict:
//!
//! - a failure outcome from the chain rolls back and is returned unchanged
//! - a tripped cancellation token after the handler ran rolls back and
//!   becomes the cancellation failure (the work is discarded, not half-saved)
//! - a `save_changes` or `commit` fault rolls back and becomes a `General`
//!   failure, so callers can retry the whole command
//! - a panic rolls back and resumes unwinding

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::context::cancelled_outcome;
use crate::error::{codes, ErrorInfo};
use crate::handler::Next;
use crate::outcome::Outcome;

// =============================================================================
// Unit of Work Contract
// =============================================================================

/// One transactional scope. Created per command dispatch, driven by the
/// transaction behavior, never reused.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Open the transactional scope.
    async fn begin(&mut self) -> anyhow::Result<()>;

    /// Flush pending changes, returning how many were written.
    async fn save_changes(&mut self) -> anyhow::Result<u64>;

    /// Make the flushed changes permanent.
    async fn commit(&mut self) -> anyhow::Result<()>;

    /// Discard everything since `begin`.
    async fn rollback(&mut self) -> anyhow::Result<()>;
}

/// Creates a fresh [`UnitOfWork`] per command dispatch.
pub trait UnitOfWorkFactory: Send + Sync {
    /// Build a unit of work. Must be cheap; called on every command.
    fn create(&self) -> Box<dyn UnitOfWork>;
}

/// A unit of work that does nothing, successfully.
///
/// The default when a pipeline is built without a factory: commands still
/// flow through the same chain shape, the transactional steps are just
/// no-ops. Implements both the unit and the factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpUnitOfWork;

#[async_trait]
impl UnitOfWork for NoOpUnitOfWork {
    async fn begin(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn save_changes(&mut self) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl UnitOfWorkFactory for NoOpUnitOfWork {
    fn create(&self) -> Box<dyn UnitOfWork> {
        Box::new(NoOpUnitOfWork)
    }
}

// =============================================================================
// Transaction Behavior
// =============================================================================

/// Wraps the inner chain of a command in a unit of work.
pub struct TransactionBehavior {
    factory: Arc<dyn UnitOfWorkFactory>,
}

impl TransactionBehavior {
    /// Build from the configured factory.
    pub fn new(factory: Arc<dyn UnitOfWorkFactory>) -> Self {
        Self { factory }
    }

    /// Run the rest of the chain transactionally.
    pub async fn handle<T>(
        &self,
        cancellation: &CancellationToken,
        next: Next<'_, T>,
    ) -> Outcome<T> {
        let mut uow = self.factory.create();

        if let Err(err) = uow.begin().await {
            return Outcome::failure(
                ErrorInfo::general(
                    codes::TRANSACTION_BEGIN_FAILED,
                    "could not open a transaction",
                )
                .with_detail(serde_json::json!({ "cause": format!("{err:#}") })),
            );
        }

        let outcome = match AssertUnwindSafe(next.run()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                rollback_logged(uow.as_mut()).await;
                std::panic::resume_unwind(payload);
            }
        };

        if outcome.is_failure() {
            rollback_logged(uow.as_mut()).await;
            return outcome;
        }

        if cancellation.is_cancelled() {
            rollback_logged(uow.as_mut()).await;
            return cancelled_outcome();
        }

        if let Err(err) = uow.save_changes().await {
            rollback_logged(uow.as_mut()).await;
            return Outcome::failure(
                ErrorInfo::general(
                    codes::TRANSACTION_COMMIT_FAILED,
                    "changes could not be persisted",
                )
                .with_detail(serde_json::json!({ "cause": format!("{err:#}") })),
            );
        }

        if let Err(err) = uow.commit().await {
            rollback_logged(uow.as_mut()).await;
            return Outcome::failure(
                ErrorInfo::general(
                    codes::TRANSACTION_COMMIT_FAILED,
                    "the transaction could not be committed",
                )
                .with_detail(serde_json::json!({ "cause": format!("{err:#}") })),
            );
        }

        outcome
    }
}

/// Roll back, logging instead of masking the original failure if the
/// rollback itself faults.
async fn rollback_logged(uow: &mut dyn UnitOfWork) {
    if let Err(err) = uow.rollback().await {
        tracing::error!(error = %format!("{err:#}"), "transaction rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::testing::{FakeUnitOfWorkFactory, TxOp};

    fn success_next(value: u32) -> Next<'static, u32> {
        Next::new(move || Box::pin(async move { Outcome::success(value) }))
    }

    fn failure_next() -> Next<'static, u32> {
        Next::new(|| {
            Box::pin(async {
                Outcome::failure(ErrorInfo::conflict("tenant.duplicate_name", "taken"))
            })
        })
    }

    // =========================================================================
    // Happy Path Tests
    // =========================================================================

    #[tokio::test]
    async fn test_success_saves_then_commits() {
        let factory = FakeUnitOfWorkFactory::new();
        let behavior = TransactionBehavior::new(Arc::new(factory.clone()));
        let token = CancellationToken::new();

        let outcome = behavior.handle(&token, success_next(3)).await;

        assert_eq!(outcome.value(), Some(&3));
        assert_eq!(
            factory.ops(),
            vec![TxOp::Begin, TxOp::SaveChanges, TxOp::Commit]
        );
    }

    // =========================================================================
    // Failure Path Tests
    // =========================================================================

    #[tokio::test]
    async fn test_handler_failure_rolls_back_unchanged() {
        let factory = FakeUnitOfWorkFactory::new();
        let behavior = TransactionBehavior::new(Arc::new(factory.clone()));
        let token = CancellationToken::new();

        let outcome = behavior.handle(&token, failure_next()).await;

        assert_eq!(outcome.errors()[0].code, "tenant.duplicate_name");
        assert_eq!(factory.ops(), vec![TxOp::Begin, TxOp::Rollback]);
    }

    #[tokio::test]
    async fn test_begin_fault_fails_without_running_the_chain() {
        let factory = FakeUnitOfWorkFactory::new();
        factory.fail_next_begin();
        let behavior = TransactionBehavior::new(Arc::new(factory.clone()));
        let token = CancellationToken::new();

        let ran = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = ran.clone();
        let next: Next<'static, u32> = Next::new(move || {
            Box::pin(async move {
                counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Outcome::success(0)
            })
        });

        let outcome = behavior.handle(&token, next).await;

        assert_eq!(outcome.errors()[0].code, codes::TRANSACTION_BEGIN_FAILED);
        assert_eq!(outcome.errors()[0].category, ErrorCategory::General);
        assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(factory.ops(), vec![TxOp::Begin]);
    }

    #[tokio::test]
    async fn test_save_changes_fault_rolls_back_as_general_failure() {
        let factory = FakeUnitOfWorkFactory::new();
        factory.fail_next_save_changes();
        let behavior = TransactionBehavior::new(Arc::new(factory.clone()));
        let token = CancellationToken::new();

        let outcome = behavior.handle(&token, success_next(3)).await;

        assert!(outcome.is_failure());
        assert_eq!(outcome.errors()[0].code, codes::TRANSACTION_COMMIT_FAILED);
        assert_eq!(outcome.errors()[0].category, ErrorCategory::General);
        assert_eq!(
            factory.ops(),
            vec![TxOp::Begin, TxOp::SaveChanges, TxOp::Rollback]
        );
    }

    #[tokio::test]
    async fn test_commit_fault_rolls_back_as_general_failure() {
        let factory = FakeUnitOfWorkFactory::new();
        factory.fail_next_commit();
        let behavior = TransactionBehavior::new(Arc::new(factory.clone()));
        let token = CancellationToken::new();

        let outcome = behavior.handle(&token, success_next(3)).await;

        assert_eq!(outcome.errors()[0].code, codes::TRANSACTION_COMMIT_FAILED);
        assert_eq!(
            factory.ops(),
            vec![TxOp::Begin, TxOp::SaveChanges, TxOp::Commit, TxOp::Rollback]
        );
    }

    // =========================================================================
    // Cancellation Tests
    // =========================================================================

    #[tokio::test]
    async fn test_cancellation_after_handler_discards_the_work() {
        let factory = FakeUnitOfWorkFactory::new();
        let behavior = TransactionBehavior::new(Arc::new(factory.clone()));
        let token = CancellationToken::new();

        let trip = token.clone();
        let next: Next<'static, u32> = Next::new(move || {
            Box::pin(async move {
                trip.cancel();
                Outcome::success(3)
            })
        });

        let outcome = behavior.handle(&token, next).await;

        assert_eq!(outcome.errors()[0].code, codes::CANCELLED);
        assert_eq!(factory.ops(), vec![TxOp::Begin, TxOp::Rollback]);
    }

    // =========================================================================
    // Panic Tests
    // =========================================================================

    #[tokio::test]
    async fn test_panic_rolls_back_then_resumes() {
        let factory = FakeUnitOfWorkFactory::new();
        let behavior = TransactionBehavior::new(Arc::new(factory.clone()));
        let token = CancellationToken::new();
        let next: Next<'static, u32> =
            Next::new(|| Box::pin(async { panic!("handler exploded") }));

        let result = AssertUnwindSafe(behavior.handle(&token, next))
            .catch_unwind()
            .await;

        assert!(result.is_err());
        assert_eq!(factory.ops(), vec![TxOp::Begin, TxOp::Rollback]);
    }
}
