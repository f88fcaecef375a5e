//! In-memory broker for testing and development purposes.
//!
//! [`InMemoryBroker`] implements the messaging traits with real transactional
//! semantics: sends are staged per session until commit, provisionally received
//! messages are redelivered on rollback, and queue depth can be inspected so the
//! broker doubles as a [`DepthSampler`]. All data is held in memory and is lost when
//! the process terminates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use crate::coordinator::TransactionBranch;
use crate::error::{BenchResult, ErrorKind};
use crate::flow::DepthSampler;
use crate::messaging::base::{
    MessageConsumer, MessageProducer, MessagingConnection, MessagingConnector, MessagingSession,
};
use crate::types::{DestinationKind, DestinationSpec, Message};
use crate::{bail, bench_error};

/// A single delivery buffer: the shared queue for a queue destination, or one
/// subscriber's private buffer for a topic destination.
#[derive(Debug, Default)]
struct MessageQueue {
    ready: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl MessageQueue {
    fn push_back(&self, message: Message) {
        self.ready
            .lock()
            .expect("message queue lock poisoned")
            .push_back(message);
        self.notify.notify_one();
    }

    fn push_front(&self, message: Message) {
        self.ready
            .lock()
            .expect("message queue lock poisoned")
            .push_front(message);
        self.notify.notify_one();
    }

    fn pop_front(&self) -> Option<Message> {
        self.ready
            .lock()
            .expect("message queue lock poisoned")
            .pop_front()
    }

    fn depth(&self) -> u64 {
        self.ready.lock().expect("message queue lock poisoned").len() as u64
    }
}

#[derive(Debug, Default)]
struct BrokerInner {
    /// Shared queues by destination name.
    queues: Mutex<HashMap<String, Arc<MessageQueue>>>,
    /// Per-subscriber buffers by topic name. Weak so a dropped consumer
    /// unsubscribes implicitly.
    topics: Mutex<HashMap<String, Vec<Weak<MessageQueue>>>>,
}

/// In-memory message broker.
///
/// Cloning is cheap; all clones share the same queues and topics.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current depth of the named queue.
    ///
    /// An unknown queue has depth zero; it simply has not seen traffic yet.
    pub fn queue_depth(&self, name: &str) -> u64 {
        let queues = self.inner.queues.lock().expect("broker lock poisoned");
        queues.get(name).map(|queue| queue.depth()).unwrap_or(0)
    }

    fn queue(&self, name: &str) -> Arc<MessageQueue> {
        let mut queues = self.inner.queues.lock().expect("broker lock poisoned");
        queues.entry(name.to_string()).or_default().clone()
    }

    fn subscribe_topic(&self, name: &str) -> Arc<MessageQueue> {
        let subscription = Arc::new(MessageQueue::default());
        let mut topics = self.inner.topics.lock().expect("broker lock poisoned");
        topics
            .entry(name.to_string())
            .or_default()
            .push(Arc::downgrade(&subscription));

        subscription
    }

    fn deliver(&self, destination: &DestinationSpec, message: Message) {
        match destination.kind {
            DestinationKind::Queue => {
                self.queue(&destination.name).push_back(message);
            }
            DestinationKind::Topic => {
                let mut topics = self.inner.topics.lock().expect("broker lock poisoned");
                if let Some(subscriptions) = topics.get_mut(&destination.name) {
                    subscriptions.retain(|subscription| match subscription.upgrade() {
                        Some(subscription) => {
                            subscription.push_back(message.clone());
                            true
                        }
                        None => false,
                    });
                }
            }
        }
    }
}

impl MessagingConnector for InMemoryBroker {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> BenchResult<InMemoryConnection> {
        debug!("opening in-memory broker connection");

        Ok(InMemoryConnection {
            broker: self.clone(),
            started: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl DepthSampler for InMemoryBroker {
    async fn sample_depth(&self, queue: &str) -> BenchResult<u64> {
        Ok(self.queue_depth(queue))
    }
}

/// Connection to the in-memory broker.
#[derive(Debug, Clone)]
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    started: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MessagingConnection for InMemoryConnection {
    type Session = InMemorySession;

    async fn create_session(&self) -> BenchResult<InMemorySession> {
        if self.closed.load(Ordering::Acquire) {
            bail!(
                ErrorKind::SessionError,
                "Session creation failed",
                "the connection is closed"
            );
        }

        Ok(InMemorySession {
            core: Arc::new(SessionCore {
                broker: self.broker.clone(),
                connection_started: self.started.clone(),
                staged: Mutex::new(SessionStaged::default()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    async fn start(&self) -> BenchResult<()> {
        self.started.store(true, Ordering::Release);

        Ok(())
    }

    async fn close(&self) -> BenchResult<()> {
        // Double close is fine.
        self.closed.store(true, Ordering::Release);
        self.started.store(false, Ordering::Release);

        Ok(())
    }
}

/// Work staged on a session's transaction.
#[derive(Debug, Default)]
struct SessionStaged {
    /// Sends held back until commit.
    sends: Vec<(DestinationSpec, Message)>,
    /// Messages handed to consumers but not yet acknowledged, with the buffer
    /// they came from so rollback can requeue them.
    delivered: Vec<(Arc<MessageQueue>, Message)>,
}

#[derive(Debug)]
struct SessionCore {
    broker: InMemoryBroker,
    connection_started: Arc<AtomicBool>,
    staged: Mutex<SessionStaged>,
    closed: AtomicBool,
}

impl SessionCore {
    fn ensure_open(&self) -> BenchResult<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!(
                ErrorKind::SessionError,
                "Session operation failed",
                "the session is closed"
            );
        }

        Ok(())
    }

    /// Publishes staged sends and acknowledges delivered messages.
    fn apply_commit(&self) -> BenchResult<()> {
        self.ensure_open()?;

        let staged = {
            let mut staged = self.staged.lock().expect("session lock poisoned");
            std::mem::take(&mut *staged)
        };

        for (destination, message) in staged.sends {
            self.broker.deliver(&destination, message);
        }
        // Dropping `delivered` acknowledges the messages.

        Ok(())
    }

    /// Discards staged sends and requeues delivered messages for redelivery.
    fn apply_rollback(&self) {
        let staged = {
            let mut staged = self.staged.lock().expect("session lock poisoned");
            std::mem::take(&mut *staged)
        };

        // Requeue in reverse so redelivery preserves the original order.
        for (queue, message) in staged.delivered.into_iter().rev() {
            queue.push_front(message);
        }
    }
}

/// Transacted session on the in-memory broker.
#[derive(Debug)]
pub struct InMemorySession {
    core: Arc<SessionCore>,
}

impl MessagingSession for InMemorySession {
    type Producer = InMemoryProducer;
    type Consumer = InMemoryConsumer;
    type Branch = InMemoryBranch;

    async fn create_producer(&self, destination: &DestinationSpec) -> BenchResult<InMemoryProducer> {
        self.core.ensure_open()?;

        Ok(InMemoryProducer {
            core: self.core.clone(),
            destination: destination.clone(),
        })
    }

    async fn create_consumer(&self, destination: &DestinationSpec) -> BenchResult<InMemoryConsumer> {
        self.core.ensure_open()?;

        let queue = match destination.kind {
            DestinationKind::Queue => self.core.broker.queue(&destination.name),
            DestinationKind::Topic => self.core.broker.subscribe_topic(&destination.name),
        };

        Ok(InMemoryConsumer {
            core: self.core.clone(),
            queue,
        })
    }

    async fn commit(&self) -> BenchResult<()> {
        self.core.apply_commit()
    }

    async fn rollback(&self) -> BenchResult<()> {
        self.core.ensure_open()?;
        self.core.apply_rollback();

        Ok(())
    }

    fn branch(&self) -> InMemoryBranch {
        InMemoryBranch {
            core: self.core.clone(),
        }
    }

    async fn close(&self) -> BenchResult<()> {
        // Closing a transacted session discards its in-flight transaction.
        if !self.core.closed.swap(true, Ordering::AcqRel) {
            self.core.apply_rollback();
        }

        Ok(())
    }
}

/// Producer bound to one destination.
#[derive(Debug, Clone)]
pub struct InMemoryProducer {
    core: Arc<SessionCore>,
    destination: DestinationSpec,
}

impl MessageProducer for InMemoryProducer {
    async fn send(&self, message: Message) -> BenchResult<()> {
        if self.core.closed.load(Ordering::Acquire) {
            bail!(
                ErrorKind::SendFailed,
                "Message could not be sent",
                "the session is closed"
            );
        }

        let mut staged = self.core.staged.lock().expect("session lock poisoned");
        staged.sends.push((self.destination.clone(), message));

        Ok(())
    }
}

/// Consumer bound to one destination.
#[derive(Debug, Clone)]
pub struct InMemoryConsumer {
    core: Arc<SessionCore>,
    queue: Arc<MessageQueue>,
}

impl MessageConsumer for InMemoryConsumer {
    async fn receive(&self, timeout: Duration) -> BenchResult<Option<Message>> {
        if self.core.closed.load(Ordering::Acquire) {
            bail!(
                ErrorKind::ReceiveFailed,
                "Message could not be received",
                "the session is closed"
            );
        }

        if !self.core.connection_started.load(Ordering::Acquire) {
            bail!(
                ErrorKind::InvalidState,
                "Connection not started",
                "the connection must be started before receiving"
            );
        }

        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(message) = self.queue.pop_front() {
                let mut staged = self.core.staged.lock().expect("session lock poisoned");
                staged.delivered.push((self.queue.clone(), message.clone()));

                return Ok(Some(message));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            // notify_one stores a permit when nobody is parked yet, so a message
            // pushed between the pop above and this await is not lost.
            let _ = tokio::time::timeout_at(deadline, self.queue.notify.notified()).await;
        }
    }
}

/// The session's transaction branch, enlistable with a coordinator.
#[derive(Debug, Clone)]
pub struct InMemoryBranch {
    core: Arc<SessionCore>,
}

impl PartialEq for InMemoryBranch {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl TransactionBranch for InMemoryBranch {
    async fn prepare(&self) -> BenchResult<()> {
        self.core.ensure_open().map_err(|err| {
            bench_error!(
                ErrorKind::TransactionCommitFailed,
                "Branch cannot prepare",
                "the owning session is closed"
            )
            .with_source(err)
        })
    }

    async fn commit(&self) -> BenchResult<()> {
        self.core.apply_commit()
    }

    async fn rollback(&self) -> BenchResult<()> {
        self.core.apply_rollback();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started_session(broker: &InMemoryBroker) -> (InMemoryConnection, InMemorySession) {
        let connection = broker.connect().await.unwrap();
        connection.start().await.unwrap();
        let session = connection.create_session().await.unwrap();

        (connection, session)
    }

    #[tokio::test]
    async fn sends_are_invisible_until_commit() {
        let broker = InMemoryBroker::new();
        let destination = DestinationSpec::queue("bench");
        let (_connection, session) = started_session(&broker).await;

        let producer = session.create_producer(&destination).await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();

        assert_eq!(broker.queue_depth("bench"), 0);

        session.commit().await.unwrap();
        assert_eq!(broker.queue_depth("bench"), 2);
    }

    #[tokio::test]
    async fn rollback_discards_staged_sends() {
        let broker = InMemoryBroker::new();
        let destination = DestinationSpec::queue("bench");
        let (_connection, session) = started_session(&broker).await;

        let producer = session.create_producer(&destination).await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        session.rollback().await.unwrap();

        session.commit().await.unwrap();
        assert_eq!(broker.queue_depth("bench"), 0);
    }

    #[tokio::test]
    async fn rollback_redelivers_received_messages_in_order() {
        let broker = InMemoryBroker::new();
        let destination = DestinationSpec::queue("bench");

        let (_connection, producer_session) = started_session(&broker).await;
        let producer = producer_session.create_producer(&destination).await.unwrap();
        let first = Message::with_random_payload(8);
        let second = Message::with_random_payload(8);
        producer.send(first.clone()).await.unwrap();
        producer.send(second.clone()).await.unwrap();
        producer_session.commit().await.unwrap();

        let (_connection, consumer_session) = started_session(&broker).await;
        let consumer = consumer_session.create_consumer(&destination).await.unwrap();
        let received = consumer.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(received, Some(first.clone()));
        consumer_session.rollback().await.unwrap();

        // After rollback both messages are available again, in the original order.
        let redelivered = consumer.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(redelivered, Some(first));
        let next = consumer.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(next, Some(second));
    }

    #[tokio::test]
    async fn commit_acknowledges_received_messages() {
        let broker = InMemoryBroker::new();
        let destination = DestinationSpec::queue("bench");

        let (_connection, session) = started_session(&broker).await;
        let producer = session.create_producer(&destination).await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        session.commit().await.unwrap();

        let consumer = session.create_consumer(&destination).await.unwrap();
        assert!(
            consumer
                .receive(Duration::from_millis(100))
                .await
                .unwrap()
                .is_some()
        );
        session.commit().await.unwrap();

        assert_eq!(broker.queue_depth("bench"), 0);
        assert!(
            consumer
                .receive(Duration::from_millis(50))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn receive_requires_started_connection() {
        let broker = InMemoryBroker::new();
        let destination = DestinationSpec::queue("bench");

        let connection = broker.connect().await.unwrap();
        let session = connection.create_session().await.unwrap();
        let consumer = session.create_consumer(&destination).await.unwrap();

        let err = consumer
            .receive(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn topics_fan_out_to_every_subscriber() {
        let broker = InMemoryBroker::new();
        let destination = DestinationSpec::topic("events");

        let (_connection_a, subscriber_a) = started_session(&broker).await;
        let consumer_a = subscriber_a.create_consumer(&destination).await.unwrap();
        let (_connection_b, subscriber_b) = started_session(&broker).await;
        let consumer_b = subscriber_b.create_consumer(&destination).await.unwrap();

        let (_connection, publisher) = started_session(&broker).await;
        let producer = publisher.create_producer(&destination).await.unwrap();
        let message = Message::with_random_payload(8);
        producer.send(message.clone()).await.unwrap();
        publisher.commit().await.unwrap();

        assert_eq!(
            consumer_a.receive(Duration::from_millis(100)).await.unwrap(),
            Some(message.clone())
        );
        assert_eq!(
            consumer_b.receive(Duration::from_millis(100)).await.unwrap(),
            Some(message)
        );
    }

    #[tokio::test]
    async fn session_close_rolls_back_and_is_idempotent() {
        let broker = InMemoryBroker::new();
        let destination = DestinationSpec::queue("bench");
        let (_connection, session) = started_session(&broker).await;

        let producer = session.create_producer(&destination).await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();

        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(broker.queue_depth("bench"), 0);
        assert!(producer.send(Message::with_random_payload(8)).await.is_err());
    }

    #[tokio::test]
    async fn branch_commit_publishes_staged_work() {
        let broker = InMemoryBroker::new();
        let destination = DestinationSpec::queue("bench");
        let (_connection, session) = started_session(&broker).await;

        let producer = session.create_producer(&destination).await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();

        let branch = session.branch();
        branch.prepare().await.unwrap();
        branch.commit().await.unwrap();

        assert_eq!(broker.queue_depth("bench"), 1);
    }

    #[tokio::test]
    async fn depth_sampler_reads_queue_depth() {
        let broker = InMemoryBroker::new();
        let destination = DestinationSpec::queue("bench");
        let (_connection, session) = started_session(&broker).await;

        let producer = session.create_producer(&destination).await.unwrap();
        producer.send(Message::with_random_payload(8)).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(broker.sample_depth("bench").await.unwrap(), 1);
        assert_eq!(broker.sample_depth("other").await.unwrap(), 0);
    }
}
