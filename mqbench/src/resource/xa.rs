//! Resource manager whose transactions span a coordinator.
//!
//! Each transaction is begun on the coordinator and the messaging session's branch is
//! enlisted in it, so the session's staged work commits or rolls back under the
//! coordinator's two-phase protocol rather than the session's own commit.

use tracing::{debug, warn};

use crate::bail;
use crate::bench_error;
use crate::coordinator::base::{BranchOutcome, CoordinatedTransaction, TransactionCoordinator};
use crate::error::{BenchResult, ErrorKind};
use crate::messaging::base::{MessagingConnection, MessagingConnector, MessagingSession};
use crate::resource::base::{ResourceManager, ResourceManagerFactory};
use crate::types::DestinationSpec;

type ConnectionOf<C> = <C as MessagingConnector>::Connection;
type SessionOf<C> = <ConnectionOf<C> as MessagingConnection>::Session;
type ProducerOf<C> = <SessionOf<C> as MessagingSession>::Producer;
type ConsumerOf<C> = <SessionOf<C> as MessagingSession>::Consumer;
type BranchOf<C> = <SessionOf<C> as MessagingSession>::Branch;

/// Resource manager enlisting its session in coordinator-managed transactions.
///
/// Tracks the open transaction explicitly: `close` makes its compensating rollback
/// attempt only when a transaction is genuinely still open, so a transaction that
/// already committed is never rolled back at teardown.
pub struct XaResourceManager<C, X>
where
    C: MessagingConnector,
    X: TransactionCoordinator<BranchOf<C>>,
{
    connector: C,
    coordinator: X,
    destination: DestinationSpec,
    connection: Option<ConnectionOf<C>>,
    session: Option<SessionOf<C>>,
    producer: Option<ProducerOf<C>>,
    consumer: Option<ConsumerOf<C>>,
    transaction: Option<X::Transaction>,
    closed: bool,
}

impl<C, X> XaResourceManager<C, X>
where
    C: MessagingConnector + Send + Sync + 'static,
    X: TransactionCoordinator<BranchOf<C>> + Send + Sync + 'static,
{
    /// Creates a manager; no connection is opened until first use.
    pub fn new(connector: C, coordinator: X, destination: DestinationSpec) -> Self {
        Self {
            connector,
            coordinator,
            destination,
            connection: None,
            session: None,
            producer: None,
            consumer: None,
            transaction: None,
            closed: false,
        }
    }

    /// Returns the session, lazily opening the connection and session on first use.
    async fn session(&mut self) -> BenchResult<&SessionOf<C>> {
        if self.closed {
            bail!(
                ErrorKind::InvalidState,
                "Resource manager is closed",
                "no operations are allowed after close"
            );
        }

        if self.connection.is_none() {
            debug!("opening messaging connection");
            self.connection = Some(self.connector.connect().await?);
        }

        if self.session.is_none()
            && let Some(connection) = self.connection.as_ref()
        {
            self.session = Some(connection.create_session().await?);
        }

        match self.session.as_ref() {
            Some(session) => Ok(session),
            None => bail!(ErrorKind::SessionError, "Session unavailable"),
        }
    }
}

impl<C, X> ResourceManager for XaResourceManager<C, X>
where
    C: MessagingConnector + Send + Sync + 'static,
    X: TransactionCoordinator<BranchOf<C>> + Send + Sync + 'static,
{
    type Producer = ProducerOf<C>;
    type Consumer = ConsumerOf<C>;

    async fn producer(&mut self) -> BenchResult<ProducerOf<C>> {
        if self.producer.is_none() {
            let destination = self.destination.clone();
            let session = self.session().await?;
            let producer = session.create_producer(&destination).await?;
            self.producer = Some(producer);
        }

        match self.producer.as_ref() {
            Some(producer) => Ok(producer.clone()),
            None => bail!(ErrorKind::SessionError, "Producer unavailable"),
        }
    }

    async fn consumer(&mut self) -> BenchResult<ConsumerOf<C>> {
        if self.consumer.is_none() {
            let destination = self.destination.clone();
            let session = self.session().await?;
            let consumer = session.create_consumer(&destination).await?;

            if let Some(connection) = self.connection.as_ref() {
                connection.start().await?;
            }

            self.consumer = Some(consumer);
        }

        match self.consumer.as_ref() {
            Some(consumer) => Ok(consumer.clone()),
            None => bail!(ErrorKind::SessionError, "Consumer unavailable"),
        }
    }

    async fn start_transaction(&mut self) -> BenchResult<()> {
        if self.transaction.is_some() {
            bail!(
                ErrorKind::InvalidState,
                "Transaction already open",
                "commit or roll back the current transaction first"
            );
        }

        let branch = self.session().await?.branch();

        // A coordinator that cannot begin transactions ends the run; this error is
        // not retried.
        let mut transaction = self.coordinator.begin().await?;

        if let Err(err) = transaction.enlist(branch).await {
            // The transaction exists on the coordinator side; abandon it cleanly.
            if let Err(rollback_err) = transaction.rollback().await {
                warn!(error = %rollback_err, "failed to abandon transaction after enlist error");
            }

            return Err(bench_error!(
                ErrorKind::TransactionStartFailed,
                "Branch enlistment failed",
                source: err
            ));
        }

        self.transaction = Some(transaction);

        Ok(())
    }

    async fn commit(&mut self) -> BenchResult<()> {
        let Some(mut transaction) = self.transaction.take() else {
            bail!(
                ErrorKind::InvalidState,
                "No open transaction",
                "start_transaction must be called before commit"
            );
        };

        let branch = self.session().await?.branch();

        if let Err(err) = transaction.delist(&branch, BranchOutcome::Success).await {
            if let Err(rollback_err) = transaction.rollback().await {
                warn!(error = %rollback_err, "failed to roll back after delist error");
            }

            return Err(bench_error!(
                ErrorKind::TransactionCommitFailed,
                "Branch delist failed",
                source: err
            ));
        }

        // Heuristic outcomes propagate from here; the transaction is over either way.
        transaction.commit().await
    }

    async fn rollback(&mut self) -> BenchResult<()> {
        let Some(mut transaction) = self.transaction.take() else {
            bail!(
                ErrorKind::InvalidState,
                "No open transaction",
                "start_transaction must be called before rollback"
            );
        };

        let branch = self.session().await?.branch();

        if let Err(err) = transaction.delist(&branch, BranchOutcome::Failed).await {
            warn!(error = %err, "failed to delist branch before rollback");
        }

        transaction.rollback().await.map_err(|err| {
            bench_error!(
                ErrorKind::TransactionRollbackFailed,
                "Transaction rollback failed",
                source: err
            )
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.producer = None;
        self.consumer = None;

        // Only a transaction that is genuinely still open gets the compensating
        // rollback; a committed transaction left `self.transaction` empty.
        if let Some(transaction) = self.transaction.take()
            && let Err(err) = transaction.rollback().await
        {
            warn!(error = %err, "rollback during close failed");
        }

        if let Some(session) = self.session.take()
            && let Err(err) = session.close().await
        {
            warn!(error = %err, "session close failed");
        }

        if let Some(connection) = self.connection.take()
            && let Err(err) = connection.close().await
        {
            warn!(error = %err, "connection close failed");
        }
    }
}

/// Factory producing [`XaResourceManager`]s sharing one connector and coordinator.
#[derive(Debug, Clone)]
pub struct XaTransactionFactory<C, X> {
    connector: C,
    coordinator: X,
}

impl<C, X> XaTransactionFactory<C, X>
where
    C: MessagingConnector + Clone + Send + Sync + 'static,
    X: TransactionCoordinator<BranchOf<C>> + Clone + Send + Sync + 'static,
{
    /// Creates a factory over the given connector and coordinator.
    pub fn new(connector: C, coordinator: X) -> Self {
        Self {
            connector,
            coordinator,
        }
    }
}

impl<C, X> ResourceManagerFactory for XaTransactionFactory<C, X>
where
    C: MessagingConnector + Clone + Send + Sync + 'static,
    X: TransactionCoordinator<BranchOf<C>> + Clone + Send + Sync + 'static,
{
    type Manager = XaResourceManager<C, X>;

    fn create(&self, destination: DestinationSpec) -> XaResourceManager<C, X> {
        XaResourceManager::new(self.connector.clone(), self.coordinator.clone(), destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::coordinator::memory::InMemoryCoordinator;
    use crate::messaging::base::MessageProducer;
    use crate::messaging::memory::InMemoryBroker;
    use crate::types::Message;

    fn manager(
        broker: &InMemoryBroker,
        coordinator: &InMemoryCoordinator,
    ) -> XaResourceManager<InMemoryBroker, InMemoryCoordinator> {
        XaResourceManager::new(
            broker.clone(),
            coordinator.clone(),
            DestinationSpec::queue("bench"),
        )
    }

    #[tokio::test]
    async fn commit_runs_through_the_coordinator() {
        let broker = InMemoryBroker::new();
        let coordinator = InMemoryCoordinator::new();
        let mut rm = manager(&broker, &coordinator);

        rm.start_transaction().await.unwrap();
        let producer = rm.producer().await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        rm.commit().await.unwrap();

        assert_eq!(broker.queue_depth("bench"), 1);
        assert_eq!(coordinator.committed(), 1);
        rm.close().await;
    }

    #[tokio::test]
    async fn rollback_discards_staged_work() {
        let broker = InMemoryBroker::new();
        let coordinator = InMemoryCoordinator::new();
        let mut rm = manager(&broker, &coordinator);

        rm.start_transaction().await.unwrap();
        let producer = rm.producer().await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        rm.rollback().await.unwrap();

        assert_eq!(broker.queue_depth("bench"), 0);
        assert_eq!(coordinator.rolled_back(), 1);
        rm.close().await;
    }

    #[tokio::test]
    async fn begin_failure_leaves_no_transaction_open() {
        let broker = InMemoryBroker::new();
        let coordinator = InMemoryCoordinator::new();
        let mut rm = manager(&broker, &coordinator);

        coordinator.fail_next_begin();
        let err = rm.start_transaction().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionStartFailed);

        let err = rm.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        // The coordinator recovered; the next transaction works.
        rm.start_transaction().await.unwrap();
        rm.commit().await.unwrap();
        rm.close().await;
    }

    #[tokio::test]
    async fn heuristic_outcome_propagates_from_commit() {
        let broker = InMemoryBroker::new();
        let coordinator = InMemoryCoordinator::new();
        let mut rm = manager(&broker, &coordinator);

        coordinator.set_heuristic_on_commit(true);
        rm.start_transaction().await.unwrap();
        let producer = rm.producer().await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();

        let err = rm.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HeuristicOutcome);

        // The transaction is over; close must not roll anything back.
        rm.close().await;
        assert_eq!(broker.queue_depth("bench"), 1);
    }

    #[tokio::test]
    async fn close_rolls_back_only_open_transactions() {
        let broker = InMemoryBroker::new();
        let coordinator = InMemoryCoordinator::new();

        // Open transaction at close time: staged work is discarded.
        let mut rm = manager(&broker, &coordinator);
        rm.start_transaction().await.unwrap();
        let producer = rm.producer().await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        rm.close().await;
        assert_eq!(broker.queue_depth("bench"), 0);
        assert_eq!(coordinator.rolled_back(), 1);

        // Committed transaction at close time: nothing is rolled back.
        let mut rm = manager(&broker, &coordinator);
        rm.start_transaction().await.unwrap();
        let producer = rm.producer().await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        rm.commit().await.unwrap();
        rm.close().await;
        rm.close().await;
        assert_eq!(broker.queue_depth("bench"), 1);
        assert_eq!(coordinator.rolled_back(), 1);
    }
}
