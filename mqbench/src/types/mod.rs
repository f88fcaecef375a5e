//! Core types shared across the harness.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::RngCore;
use uuid::Uuid;

pub use mqbench_config::shared::{DestinationKind, DestinationSpec};

/// Identifier of a harness run, carried on logs and metrics.
pub type HarnessId = u64;

/// Shared monotonic counter of completed units of work.
///
/// Cloning is cheap and all clones observe the same value, so a single counter can be
/// shared between every worker and the stop controller watching it.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Creates a new counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter by one and returns the new value.
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Adds `n` to the counter and returns the new value.
    pub fn add(&self, n: u64) -> u64 {
        self.value.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Returns the current value.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A message flowing through the harness.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Unique identifier assigned at creation.
    pub id: Uuid,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// When the message was created by a producer, used for latency reporting.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message with the given payload.
    pub fn new(payload: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Creates a message with a random payload of `len` bytes.
    pub fn with_random_payload(len: usize) -> Self {
        let mut payload = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut payload);

        Self::new(Bytes::from(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_clones_share_state() {
        let counter = Counter::new();
        let clone = counter.clone();

        assert_eq!(counter.increment(), 1);
        assert_eq!(clone.add(4), 5);
        assert_eq!(counter.value(), 5);
    }

    #[test]
    fn random_payload_has_requested_length() {
        let message = Message::with_random_payload(128);
        assert_eq!(message.payload.len(), 128);
    }

    #[test]
    fn messages_get_unique_ids() {
        let a = Message::with_random_payload(8);
        let b = Message::with_random_payload(8);
        assert_ne!(a.id, b.id);
    }
}
