//! In-memory two-phase transaction coordinator for testing and development.
//!
//! Drives enlisted branches through prepare and commit. Failure injection hooks let
//! tests exercise begin failures and heuristic commit outcomes without a real
//! transaction manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::bail;
use crate::coordinator::base::{
    BranchOutcome, CoordinatedTransaction, TransactionBranch, TransactionCoordinator,
};
use crate::error::{BenchResult, ErrorKind};

#[derive(Debug, Default)]
struct CoordinatorInner {
    fail_next_begin: AtomicBool,
    heuristic_on_commit: AtomicBool,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

/// In-memory transaction coordinator.
///
/// Cloning is cheap; all clones share the same state and failure injection flags.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl InMemoryCoordinator {
    /// Creates a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions committed so far.
    pub fn committed(&self) -> u64 {
        self.inner.committed.load(Ordering::Relaxed)
    }

    /// Number of transactions rolled back so far.
    pub fn rolled_back(&self) -> u64 {
        self.inner.rolled_back.load(Ordering::Relaxed)
    }

    /// Makes the next [`TransactionCoordinator::begin`] call fail.
    pub fn fail_next_begin(&self) {
        self.inner.fail_next_begin.store(true, Ordering::Release);
    }

    /// Makes every commit report a heuristic outcome after committing its branches.
    pub fn set_heuristic_on_commit(&self, heuristic: bool) {
        self.inner
            .heuristic_on_commit
            .store(heuristic, Ordering::Release);
    }
}

impl<B> TransactionCoordinator<B> for InMemoryCoordinator
where
    B: TransactionBranch,
{
    type Transaction = InMemoryTransaction<B>;

    async fn begin(&self) -> BenchResult<InMemoryTransaction<B>> {
        if self.inner.fail_next_begin.swap(false, Ordering::AcqRel) {
            bail!(
                ErrorKind::TransactionStartFailed,
                "Transaction could not be started",
                "begin failure injected by test"
            );
        }

        Ok(InMemoryTransaction {
            coordinator: self.inner.clone(),
            branches: Vec::new(),
        })
    }
}

#[derive(Debug)]
struct Enlistment<B> {
    branch: B,
    outcome: Option<BranchOutcome>,
}

/// A single transaction managed by [`InMemoryCoordinator`].
#[derive(Debug)]
pub struct InMemoryTransaction<B> {
    coordinator: Arc<CoordinatorInner>,
    branches: Vec<Enlistment<B>>,
}

impl<B> CoordinatedTransaction<B> for InMemoryTransaction<B>
where
    B: TransactionBranch,
{
    async fn enlist(&mut self, branch: B) -> BenchResult<()> {
        if self.branches.iter().any(|e| e.branch == branch) {
            bail!(
                ErrorKind::InvalidState,
                "Branch already enlisted",
                "a branch can participate in a transaction only once"
            );
        }

        self.branches.push(Enlistment {
            branch,
            outcome: None,
        });

        Ok(())
    }

    async fn delist(&mut self, branch: &B, outcome: BranchOutcome) -> BenchResult<()> {
        let Some(enlistment) = self.branches.iter_mut().find(|e| &e.branch == branch) else {
            bail!(
                ErrorKind::InvalidState,
                "Branch not enlisted",
                "only enlisted branches can be delisted"
            );
        };

        enlistment.outcome = Some(outcome);

        Ok(())
    }

    async fn commit(self) -> BenchResult<()> {
        // A branch delisted as failed marks the whole transaction rollback-only.
        if self
            .branches
            .iter()
            .any(|e| e.outcome == Some(BranchOutcome::Failed))
        {
            rollback_branches(&self.branches).await;
            self.coordinator.rolled_back.fetch_add(1, Ordering::Relaxed);

            bail!(
                ErrorKind::TransactionCommitFailed,
                "Transaction marked rollback-only",
                "a branch was delisted with a failure outcome"
            );
        }

        // Phase one: prepare everything before committing anything.
        for enlistment in &self.branches {
            if let Err(err) = enlistment.branch.prepare().await {
                warn!(error = %err, "branch failed to prepare, rolling back transaction");
                rollback_branches(&self.branches).await;
                self.coordinator.rolled_back.fetch_add(1, Ordering::Relaxed);

                bail!(
                    ErrorKind::TransactionCommitFailed,
                    "Transaction prepare phase failed",
                    source: err
                );
            }
        }

        // Phase two: commit. A failure here, after at least one branch committed,
        // is a heuristic outcome: the transaction is partially applied.
        let mut committed_branches = 0usize;
        for enlistment in &self.branches {
            if let Err(err) = enlistment.branch.commit().await {
                if committed_branches > 0 {
                    bail!(
                        ErrorKind::HeuristicOutcome,
                        "Transaction partially committed",
                        detail = format!(
                            "{committed_branches} of {} branches committed before the failure",
                            self.branches.len()
                        ),
                        source: err
                    );
                }

                rollback_branches(&self.branches).await;
                self.coordinator.rolled_back.fetch_add(1, Ordering::Relaxed);

                bail!(
                    ErrorKind::TransactionCommitFailed,
                    "Transaction commit phase failed",
                    source: err
                );
            }

            committed_branches += 1;
        }

        self.coordinator.committed.fetch_add(1, Ordering::Relaxed);

        if self
            .coordinator
            .heuristic_on_commit
            .load(Ordering::Acquire)
        {
            bail!(
                ErrorKind::HeuristicOutcome,
                "Transaction outcome is heuristic",
                "heuristic outcome injected by test"
            );
        }

        debug!(branches = self.branches.len(), "transaction committed");

        Ok(())
    }

    async fn rollback(self) -> BenchResult<()> {
        let mut errors = Vec::new();
        for enlistment in &self.branches {
            if let Err(err) = enlistment.branch.rollback().await {
                errors.push(err);
            }
        }

        self.coordinator.rolled_back.fetch_add(1, Ordering::Relaxed);

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }
}

/// Best-effort rollback of every branch; failures are logged, not propagated.
async fn rollback_branches<B: TransactionBranch>(branches: &[Enlistment<B>]) {
    for enlistment in branches {
        if let Err(err) = enlistment.branch.rollback().await {
            warn!(error = %err, "branch rollback failed during transaction abort");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    /// Scripted branch recording the operations applied to it.
    #[derive(Debug, Clone)]
    struct RecordingBranch {
        id: u32,
        log: Arc<Mutex<Vec<String>>>,
        fail_prepare: bool,
        fail_commit: bool,
    }

    impl RecordingBranch {
        fn new(id: u32, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                id,
                log,
                fail_prepare: false,
                fail_commit: false,
            }
        }

        fn record(&self, op: &str) {
            self.log.lock().unwrap().push(format!("{op}:{}", self.id));
        }
    }

    impl PartialEq for RecordingBranch {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }

    impl TransactionBranch for RecordingBranch {
        async fn prepare(&self) -> BenchResult<()> {
            self.record("prepare");
            if self.fail_prepare {
                bail!(ErrorKind::TransactionCommitFailed, "prepare failure");
            }
            Ok(())
        }

        async fn commit(&self) -> BenchResult<()> {
            self.record("commit");
            if self.fail_commit {
                bail!(ErrorKind::TransactionCommitFailed, "commit failure");
            }
            Ok(())
        }

        async fn rollback(&self) -> BenchResult<()> {
            self.record("rollback");
            Ok(())
        }
    }

    #[tokio::test]
    async fn commit_prepares_then_commits_all_branches() {
        let coordinator = InMemoryCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut tx = coordinator.begin().await.unwrap();
        tx.enlist(RecordingBranch::new(1, log.clone())).await.unwrap();
        tx.enlist(RecordingBranch::new(2, log.clone())).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["prepare:1", "prepare:2", "commit:1", "commit:2"]
        );
        assert_eq!(coordinator.committed(), 1);
    }

    #[tokio::test]
    async fn begin_failure_injection_fires_once() {
        let coordinator = InMemoryCoordinator::new();
        coordinator.fail_next_begin();

        let err = TransactionCoordinator::<RecordingBranch>::begin(&coordinator)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionStartFailed);

        assert!(
            TransactionCoordinator::<RecordingBranch>::begin(&coordinator)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn delisted_failure_marks_rollback_only() {
        let coordinator = InMemoryCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let branch = RecordingBranch::new(1, log.clone());

        let mut tx = coordinator.begin().await.unwrap();
        tx.enlist(branch.clone()).await.unwrap();
        tx.delist(&branch, BranchOutcome::Failed).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionCommitFailed);
        assert_eq!(*log.lock().unwrap(), vec!["rollback:1"]);
        assert_eq!(coordinator.rolled_back(), 1);
    }

    #[tokio::test]
    async fn prepare_failure_rolls_back_every_branch() {
        let coordinator = InMemoryCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let healthy = RecordingBranch::new(1, log.clone());
        let mut failing = RecordingBranch::new(2, log.clone());
        failing.fail_prepare = true;

        let mut tx = coordinator.begin().await.unwrap();
        tx.enlist(healthy).await.unwrap();
        tx.enlist(failing).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionCommitFailed);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["prepare:1", "prepare:2", "rollback:1", "rollback:2"]
        );
    }

    #[tokio::test]
    async fn commit_failure_after_success_is_heuristic() {
        let coordinator = InMemoryCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let committed = RecordingBranch::new(1, log.clone());
        let mut failing = RecordingBranch::new(2, log.clone());
        failing.fail_commit = true;

        let mut tx = coordinator.begin().await.unwrap();
        tx.enlist(committed).await.unwrap();
        tx.enlist(failing).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HeuristicOutcome);
        assert!(err.detail().unwrap().contains("1 of 2 branches"));
    }

    #[tokio::test]
    async fn injected_heuristic_surfaces_after_commit() {
        let coordinator = InMemoryCoordinator::new();
        coordinator.set_heuristic_on_commit(true);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut tx = coordinator.begin().await.unwrap();
        tx.enlist(RecordingBranch::new(1, log.clone())).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HeuristicOutcome);
        // The branch work itself was applied before the heuristic was reported.
        assert_eq!(*log.lock().unwrap(), vec!["prepare:1", "commit:1"]);
    }

    #[tokio::test]
    async fn rollback_rolls_back_every_branch() {
        let coordinator = InMemoryCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut tx = coordinator.begin().await.unwrap();
        tx.enlist(RecordingBranch::new(1, log.clone())).await.unwrap();
        tx.enlist(RecordingBranch::new(2, log.clone())).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["rollback:1", "rollback:2"]);
        assert_eq!(coordinator.rolled_back(), 1);
    }

    #[tokio::test]
    async fn double_enlist_is_rejected() {
        let coordinator = InMemoryCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let branch = RecordingBranch::new(1, log);

        let mut tx = coordinator.begin().await.unwrap();
        tx.enlist(branch.clone()).await.unwrap();
        let err = tx.enlist(branch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
