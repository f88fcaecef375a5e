use serde::{Deserialize, Serialize};

/// Kind of messaging destination a harness produces to or consumes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Point-to-point destination; each message is delivered to one consumer.
    Queue,
    /// Publish-subscribe destination; each message is delivered to every
    /// active subscriber.
    Topic,
}

/// A named messaging destination.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct DestinationSpec {
    /// Broker-side name of the destination.
    pub name: String,
    /// Whether the destination is a queue or a topic.
    #[serde(default = "default_kind")]
    pub kind: DestinationKind,
}

impl DestinationSpec {
    /// Creates a queue destination with the given name.
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
        }
    }

    /// Creates a topic destination with the given name.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
        }
    }
}

fn default_kind() -> DestinationKind {
    DestinationKind::Queue
}
