//! Top-level harness configuration.

use serde::{Deserialize, Serialize};

use crate::shared::{DestinationSpec, FlowControlConfig, StopConfig, ValidationError};

/// Configuration for a single load harness run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HarnessConfig {
    /// Identifier for this harness, carried on logs and metrics.
    pub id: u64,

    /// Destination the harness produces to and consumes from.
    pub destination: DestinationSpec,

    /// Number of producer workers to spawn.
    ///
    /// Default: 1
    #[serde(default = "default_producers")]
    pub producers: u16,

    /// Number of consumer workers to spawn.
    ///
    /// Default: 0
    #[serde(default)]
    pub consumers: u16,

    /// Messages sent or received per committed transaction.
    ///
    /// Default: 1
    #[serde(default = "default_messages_per_commit")]
    pub messages_per_commit: u32,

    /// Size in bytes of generated message payloads.
    ///
    /// Default: 1024
    #[serde(default = "default_message_size_bytes")]
    pub message_size_bytes: usize,

    /// How long a consumer waits for a message before treating the
    /// destination as drained for this unit of work.
    ///
    /// Default: 1000 (1 second)
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Optional depth-based producer flow control.
    #[serde(default)]
    pub flow_control: Option<FlowControlConfig>,

    /// When the run stops.
    pub stop: StopConfig,
}

impl HarnessConfig {
    /// Default producer count: 1.
    pub const DEFAULT_PRODUCERS: u16 = 1;

    /// Default messages per commit: 1.
    pub const DEFAULT_MESSAGES_PER_COMMIT: u32 = 1;

    /// Default payload size: 1 KiB.
    pub const DEFAULT_MESSAGE_SIZE_BYTES: usize = 1024;

    /// Default receive timeout: 1 second.
    pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1_000;

    /// Validates the harness configuration and all nested sections.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.producers == 0 && self.consumers == 0 {
            return Err(ValidationError::NoWorkers);
        }

        if self.messages_per_commit == 0 {
            return Err(ValidationError::invalid_field(
                "messages_per_commit",
                "must be >= 1",
            ));
        }

        if self.destination.name.is_empty() {
            return Err(ValidationError::invalid_field(
                "destination.name",
                "must not be empty",
            ));
        }

        if let Some(flow_control) = &self.flow_control {
            flow_control.validate()?;
        }

        self.stop.validate()?;

        Ok(())
    }
}

fn default_producers() -> u16 {
    HarnessConfig::DEFAULT_PRODUCERS
}

fn default_messages_per_commit() -> u32 {
    HarnessConfig::DEFAULT_MESSAGES_PER_COMMIT
}

fn default_message_size_bytes() -> usize {
    HarnessConfig::DEFAULT_MESSAGE_SIZE_BYTES
}

fn default_receive_timeout_ms() -> u64 {
    HarnessConfig::DEFAULT_RECEIVE_TIMEOUT_MS
}
