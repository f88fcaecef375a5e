//! Traits abstracting the messaging system under test.
//!
//! The harness drives load through these traits so the same worker and resource
//! manager code runs against any broker. The crate ships one implementation, the
//! in-memory broker in [`crate::messaging::memory`], which is also what the
//! integration tests run against.

use std::future::Future;
use std::time::Duration;

use crate::coordinator::TransactionBranch;
use crate::error::BenchResult;
use crate::types::{DestinationSpec, Message};

/// Entry point to a messaging system; creates connections.
pub trait MessagingConnector: Send + Sync {
    /// Connection type produced by [`MessagingConnector::connect`].
    type Connection: MessagingConnection;

    /// Opens a new connection to the messaging system.
    fn connect(&self) -> impl Future<Output = BenchResult<Self::Connection>> + Send;
}

/// An open connection, factory for sessions.
pub trait MessagingConnection: Send + Sync {
    /// Session type produced by [`MessagingConnection::create_session`].
    type Session: MessagingSession;

    /// Creates a new transacted session on this connection.
    fn create_session(&self) -> impl Future<Output = BenchResult<Self::Session>> + Send;

    /// Starts message delivery; must be called before the first receive.
    fn start(&self) -> impl Future<Output = BenchResult<()>> + Send;

    /// Closes the connection. Tolerates being called more than once.
    fn close(&self) -> impl Future<Output = BenchResult<()>> + Send;
}

/// A transacted session: sends are staged and receives are provisional until the
/// session's transaction commits.
pub trait MessagingSession: Send + Sync {
    /// Producer type created by this session.
    type Producer: MessageProducer + Clone;
    /// Consumer type created by this session.
    type Consumer: MessageConsumer + Clone;
    /// Transaction branch exposed for distributed enlistment.
    type Branch: TransactionBranch;

    /// Creates a producer for the given destination.
    fn create_producer(
        &self,
        destination: &DestinationSpec,
    ) -> impl Future<Output = BenchResult<Self::Producer>> + Send;

    /// Creates a consumer for the given destination.
    fn create_consumer(
        &self,
        destination: &DestinationSpec,
    ) -> impl Future<Output = BenchResult<Self::Consumer>> + Send;

    /// Commits the session-local transaction: staged sends become visible and
    /// provisionally received messages are acknowledged.
    fn commit(&self) -> impl Future<Output = BenchResult<()>> + Send;

    /// Rolls back the session-local transaction: staged sends are discarded and
    /// provisionally received messages are redelivered.
    fn rollback(&self) -> impl Future<Output = BenchResult<()>> + Send;

    /// Returns this session's transaction branch for coordinator enlistment.
    ///
    /// When enlisted, the coordinator drives the session's staged work instead of
    /// [`MessagingSession::commit`] / [`MessagingSession::rollback`].
    fn branch(&self) -> Self::Branch;

    /// Closes the session, discarding any staged work.
    fn close(&self) -> impl Future<Output = BenchResult<()>> + Send;
}

/// Sends messages to a single destination.
pub trait MessageProducer: Send + Sync {
    /// Stages `message` for delivery on the session's transaction.
    fn send(&self, message: Message) -> impl Future<Output = BenchResult<()>> + Send;
}

/// Receives messages from a single destination.
pub trait MessageConsumer: Send + Sync {
    /// Waits up to `timeout` for a message.
    ///
    /// Returns `Ok(None)` when no message arrived in time; that is an expected
    /// drained-queue signal, not an error.
    fn receive(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = BenchResult<Option<Message>>> + Send;
}
