//! Messaging collaborator traits and the in-memory broker.

pub mod base;
pub mod memory;

pub use base::{
    MessageConsumer, MessageProducer, MessagingConnection, MessagingConnector, MessagingSession,
};
pub use memory::InMemoryBroker;
