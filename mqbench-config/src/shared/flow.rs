//! Flow control configuration for depth-based producer backpressure.

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for the depth-based flow gate that paces producers.
///
/// A background task samples the depth of the monitored queue. When the depth
/// reaches `pause_at_depth` the gate closes and producers wait; once the depth
/// has drained back to `resume_at_depth` or below the gate reopens. The two
/// thresholds form a hysteresis band so the gate does not flap around a single
/// boundary value.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FlowControlConfig {
    /// Queue depth at which producers are paused.
    ///
    /// Default: 10000
    #[serde(default = "default_pause_at_depth")]
    pub pause_at_depth: u64,

    /// Queue depth at or below which paused producers resume.
    ///
    /// Must be strictly less than `pause_at_depth`.
    /// Default: 5000
    #[serde(default = "default_resume_at_depth")]
    pub resume_at_depth: u64,

    /// Interval in seconds between depth samples.
    ///
    /// Default: 5
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Consecutive sampling failures tolerated before the sampler gives up
    /// and leaves the gate permanently open.
    ///
    /// Default: 10
    #[serde(default = "default_max_sampling_errors")]
    pub max_consecutive_sampling_errors: u32,
}

impl FlowControlConfig {
    /// Default pause threshold: 10000 messages.
    pub const DEFAULT_PAUSE_AT_DEPTH: u64 = 10_000;

    /// Default resume threshold: 5000 messages.
    pub const DEFAULT_RESUME_AT_DEPTH: u64 = 5_000;

    /// Default sampling interval: 5 seconds.
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

    /// Default sampling error ceiling: 10 consecutive failures.
    pub const DEFAULT_MAX_SAMPLING_ERRORS: u32 = 10;

    /// Validates the flow control configuration.
    ///
    /// Ensures the pause threshold is at least one, the resume threshold sits
    /// strictly below it, and the sampling interval is at least one second.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pause_at_depth == 0 {
            return Err(ValidationError::invalid_field(
                "pause_at_depth",
                "must be >= 1",
            ));
        }

        if self.resume_at_depth >= self.pause_at_depth {
            return Err(ValidationError::invalid_field(
                "resume_at_depth",
                "must be < pause_at_depth",
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err(ValidationError::invalid_field(
                "poll_interval_secs",
                "must be >= 1",
            ));
        }

        Ok(())
    }
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            pause_at_depth: Self::DEFAULT_PAUSE_AT_DEPTH,
            resume_at_depth: Self::DEFAULT_RESUME_AT_DEPTH,
            poll_interval_secs: Self::DEFAULT_POLL_INTERVAL_SECS,
            max_consecutive_sampling_errors: Self::DEFAULT_MAX_SAMPLING_ERRORS,
        }
    }
}

fn default_pause_at_depth() -> u64 {
    FlowControlConfig::DEFAULT_PAUSE_AT_DEPTH
}

fn default_resume_at_depth() -> u64 {
    FlowControlConfig::DEFAULT_RESUME_AT_DEPTH
}

fn default_poll_interval_secs() -> u64 {
    FlowControlConfig::DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_sampling_errors() -> u32 {
    FlowControlConfig::DEFAULT_MAX_SAMPLING_ERRORS
}
