//! Traits for coordinating transactions that span a messaging session and an
//! external coordinator.

use std::future::Future;

use crate::error::BenchResult;

/// Outcome reported when a branch is delisted from a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    /// The work on this branch completed and may be committed.
    Success,
    /// The work on this branch failed; the transaction must roll back.
    Failed,
}

/// A resource's participation in a coordinated transaction.
///
/// A branch is handed out by a messaging session and enlisted with a coordinator,
/// which drives it through prepare/commit or rollback.
pub trait TransactionBranch: Clone + PartialEq + Send + Sync + 'static {
    /// Verifies the branch can commit, without making changes visible.
    fn prepare(&self) -> impl Future<Output = BenchResult<()>> + Send;

    /// Makes the branch's staged work visible.
    fn commit(&self) -> impl Future<Output = BenchResult<()>> + Send;

    /// Discards the branch's staged work.
    fn rollback(&self) -> impl Future<Output = BenchResult<()>> + Send;
}

/// Begins coordinated transactions.
pub trait TransactionCoordinator<B>: Send + Sync
where
    B: TransactionBranch,
{
    /// Transaction handle produced by [`TransactionCoordinator::begin`].
    type Transaction: CoordinatedTransaction<B> + Send;

    /// Begins a new transaction.
    ///
    /// Failures surface as [`crate::error::ErrorKind::TransactionStartFailed`] and
    /// are not retried by callers; a coordinator that cannot start transactions ends
    /// the run.
    fn begin(&self) -> impl Future<Output = BenchResult<Self::Transaction>> + Send;
}

/// A single in-flight coordinated transaction.
///
/// Consuming `commit` and `rollback` make the terminal nature of both operations
/// explicit: whatever their outcome, the transaction is over.
pub trait CoordinatedTransaction<B>: Send
where
    B: TransactionBranch,
{
    /// Enlists a branch in this transaction.
    fn enlist(&mut self, branch: B) -> impl Future<Output = BenchResult<()>> + Send;

    /// Delists a branch, recording how its work ended.
    fn delist(
        &mut self,
        branch: &B,
        outcome: BranchOutcome,
    ) -> impl Future<Output = BenchResult<()>> + Send;

    /// Commits all enlisted branches.
    ///
    /// May fail with [`crate::error::ErrorKind::HeuristicOutcome`] when the outcome
    /// is mixed or unknown; callers must surface that error, never swallow it.
    fn commit(self) -> impl Future<Output = BenchResult<()>> + Send;

    /// Rolls back all enlisted branches.
    fn rollback(self) -> impl Future<Output = BenchResult<()>> + Send;
}
