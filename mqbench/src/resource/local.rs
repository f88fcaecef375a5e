//! Resource manager backed by session-local transactions.

use tracing::{debug, warn};

use crate::bail;
use crate::bench_error;
use crate::error::{BenchResult, ErrorKind};
use crate::messaging::base::{MessagingConnection, MessagingConnector, MessagingSession};
use crate::resource::base::{ResourceManager, ResourceManagerFactory};
use crate::types::DestinationSpec;

type ConnectionOf<C> = <C as MessagingConnector>::Connection;
type SessionOf<C> = <ConnectionOf<C> as MessagingConnection>::Session;
type ProducerOf<C> = <SessionOf<C> as MessagingSession>::Producer;
type ConsumerOf<C> = <SessionOf<C> as MessagingSession>::Consumer;

/// Resource manager whose transactions live entirely inside the messaging session.
///
/// Commit and rollback delegate to the transacted session itself; no external
/// coordinator is involved.
pub struct LocalResourceManager<C>
where
    C: MessagingConnector,
{
    connector: C,
    destination: DestinationSpec,
    connection: Option<ConnectionOf<C>>,
    session: Option<SessionOf<C>>,
    producer: Option<ProducerOf<C>>,
    consumer: Option<ConsumerOf<C>>,
    transaction_open: bool,
    closed: bool,
}

impl<C> LocalResourceManager<C>
where
    C: MessagingConnector + Send + Sync + 'static,
{
    /// Creates a manager; no connection is opened until first use.
    pub fn new(connector: C, destination: DestinationSpec) -> Self {
        Self {
            connector,
            destination,
            connection: None,
            session: None,
            producer: None,
            consumer: None,
            transaction_open: false,
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

impl<C> ResourceManager for LocalResourceManager<C>
where
    C: MessagingConnector + Send + Sync + 'static,
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

            // Delivery only flows on a started connection.
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
        if self.transaction_open {
            bail!(
                ErrorKind::InvalidState,
                "Transaction already open",
                "commit or roll back the current transaction first"
            );
        }

        // The session itself is the transaction scope; opening is bookkeeping.
        self.session().await?;
        self.transaction_open = true;

        Ok(())
    }

    async fn commit(&mut self) -> BenchResult<()> {
        if !self.transaction_open {
            bail!(
                ErrorKind::InvalidState,
                "No open transaction",
                "start_transaction must be called before commit"
            );
        }

        let session = self.session().await?;
        session.commit().await.map_err(|err| {
            bench_error!(
                ErrorKind::TransactionCommitFailed,
                "Transaction commit failed",
                source: err
            )
        })?;

        self.transaction_open = false;

        Ok(())
    }

    async fn rollback(&mut self) -> BenchResult<()> {
        if !self.transaction_open {
            bail!(
                ErrorKind::InvalidState,
                "No open transaction",
                "start_transaction must be called before rollback"
            );
        }

        let session = self.session().await?;
        session.rollback().await.map_err(|err| {
            bench_error!(
                ErrorKind::TransactionRollbackFailed,
                "Transaction rollback failed",
                source: err
            )
        })?;

        self.transaction_open = false;

        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.producer = None;
        self.consumer = None;

        if let Some(session) = self.session.take() {
            if self.transaction_open {
                // Exactly one compensating rollback attempt for in-flight work.
                if let Err(err) = session.rollback().await {
                    warn!(error = %err, "rollback during close failed");
                }
                self.transaction_open = false;
            }

            if let Err(err) = session.close().await {
                warn!(error = %err, "session close failed");
            }
        }

        if let Some(connection) = self.connection.take()
            && let Err(err) = connection.close().await
        {
            warn!(error = %err, "connection close failed");
        }
    }
}

/// Factory producing [`LocalResourceManager`]s sharing one connector.
#[derive(Debug, Clone)]
pub struct LocalTransactionFactory<C> {
    connector: C,
}

impl<C> LocalTransactionFactory<C>
where
    C: MessagingConnector + Clone + Send + Sync + 'static,
{
    /// Creates a factory over the given connector.
    pub fn new(connector: C) -> Self {
        Self { connector }
    }
}

impl<C> ResourceManagerFactory for LocalTransactionFactory<C>
where
    C: MessagingConnector + Clone + Send + Sync + 'static,
{
    type Manager = LocalResourceManager<C>;

    fn create(&self, destination: DestinationSpec) -> LocalResourceManager<C> {
        LocalResourceManager::new(self.connector.clone(), destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::messaging::base::{MessageConsumer, MessageProducer};
    use crate::messaging::memory::InMemoryBroker;
    use crate::types::Message;

    fn manager(broker: &InMemoryBroker) -> LocalResourceManager<InMemoryBroker> {
        LocalResourceManager::new(broker.clone(), DestinationSpec::queue("bench"))
    }

    #[tokio::test]
    async fn commit_publishes_unit_of_work() {
        let broker = InMemoryBroker::new();
        let mut rm = manager(&broker);

        rm.start_transaction().await.unwrap();
        let producer = rm.producer().await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        rm.commit().await.unwrap();

        assert_eq!(broker.queue_depth("bench"), 1);
        rm.close().await;
    }

    #[tokio::test]
    async fn rollback_discards_unit_of_work() {
        let broker = InMemoryBroker::new();
        let mut rm = manager(&broker);

        rm.start_transaction().await.unwrap();
        let producer = rm.producer().await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        rm.rollback().await.unwrap();

        assert_eq!(broker.queue_depth("bench"), 0);
        rm.close().await;
    }

    #[tokio::test]
    async fn only_one_transaction_may_be_open() {
        let broker = InMemoryBroker::new();
        let mut rm = manager(&broker);

        rm.start_transaction().await.unwrap();
        let err = rm.start_transaction().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        rm.commit().await.unwrap();
        // A new transaction is fine after the previous one ended.
        rm.start_transaction().await.unwrap();
        rm.close().await;
    }

    #[tokio::test]
    async fn commit_without_transaction_is_rejected() {
        let broker = InMemoryBroker::new();
        let mut rm = manager(&broker);

        let err = rm.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = rm.rollback().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn close_rolls_back_open_transaction() {
        let broker = InMemoryBroker::new();
        let mut rm = manager(&broker);

        rm.start_transaction().await.unwrap();
        let producer = rm.producer().await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();

        rm.close().await;
        rm.close().await;

        assert_eq!(broker.queue_depth("bench"), 0);

        let err = rm.start_transaction().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn consumer_receives_committed_messages() {
        let broker = InMemoryBroker::new();

        let mut producer_rm = manager(&broker);
        producer_rm.start_transaction().await.unwrap();
        let producer = producer_rm.producer().await.unwrap();
        let message = Message::with_random_payload(8);
        producer.send(message.clone()).await.unwrap();
        producer_rm.commit().await.unwrap();

        let mut consumer_rm = manager(&broker);
        consumer_rm.start_transaction().await.unwrap();
        let consumer = consumer_rm.consumer().await.unwrap();
        let received = consumer.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(received, Some(message));
        consumer_rm.commit().await.unwrap();

        producer_rm.close().await;
        consumer_rm.close().await;
    }
}
