//! Resource manager trait tying messaging resources to a transaction lifecycle.

use std::future::Future;

use crate::error::BenchResult;
use crate::messaging::base::{MessageConsumer, MessageProducer};
use crate::types::DestinationSpec;

/// Owns a worker's messaging resources and its transaction lifecycle.
///
/// Connection, session, producer, and consumer are created lazily, each exactly once
/// over the manager's lifetime. At most one transaction is live at a time: it is
/// opened with [`ResourceManager::start_transaction`] and ended by exactly one of
/// [`ResourceManager::commit`], [`ResourceManager::rollback`], or
/// [`ResourceManager::close`].
pub trait ResourceManager: Send {
    /// Producer handle type; cheap to clone.
    type Producer: MessageProducer + Clone + Send;
    /// Consumer handle type; cheap to clone.
    type Consumer: MessageConsumer + Clone + Send;

    /// Returns the producer, creating connection, session, and producer as needed.
    fn producer(&mut self) -> impl Future<Output = BenchResult<Self::Producer>> + Send;

    /// Returns the consumer, creating connection, session, and consumer as needed.
    ///
    /// Also starts the underlying connection so delivery is active before the first
    /// receive.
    fn consumer(&mut self) -> impl Future<Output = BenchResult<Self::Consumer>> + Send;

    /// Opens a new transaction.
    ///
    /// Fails with [`crate::error::ErrorKind::InvalidState`] when a transaction is
    /// already open.
    fn start_transaction(&mut self) -> impl Future<Output = BenchResult<()>> + Send;

    /// Commits the open transaction. Terminal for the transaction.
    fn commit(&mut self) -> impl Future<Output = BenchResult<()>> + Send;

    /// Rolls back the open transaction. Terminal for the transaction.
    fn rollback(&mut self) -> impl Future<Output = BenchResult<()>> + Send;

    /// Releases all resources.
    ///
    /// When a transaction is still open, makes exactly one compensating rollback
    /// attempt before closing. Never fails and tolerates repeated calls; secondary
    /// errors during teardown are logged, not propagated.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Creates one [`ResourceManager`] per worker.
pub trait ResourceManagerFactory: Send + Sync + 'static {
    /// Manager type produced by this factory.
    type Manager: ResourceManager + 'static;

    /// Creates a fresh resource manager bound to `destination`.
    fn create(&self, destination: DestinationSpec) -> Self::Manager;
}
