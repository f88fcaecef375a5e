//! Stop condition configuration for load runs.

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration describing when a load run should stop.
///
/// Both conditions may be set; the run then continues until every configured
/// condition has fired. At least one condition must be present.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StopConfig {
    /// Stop once this many units of work have been committed.
    #[serde(default)]
    pub stop_after_count: Option<u64>,

    /// Stop once the run has lasted this many seconds.
    #[serde(default)]
    pub stop_after_secs: Option<u64>,
}

impl StopConfig {
    /// Validates the stop configuration.
    ///
    /// Ensures at least one condition is configured and that configured
    /// values are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stop_after_count.is_none() && self.stop_after_secs.is_none() {
            return Err(ValidationError::NoStopCondition);
        }

        if self.stop_after_count == Some(0) {
            return Err(ValidationError::invalid_field(
                "stop_after_count",
                "must be >= 1",
            ));
        }

        if self.stop_after_secs == Some(0) {
            return Err(ValidationError::invalid_field(
                "stop_after_secs",
                "must be >= 1",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_a_condition() {
        let config = StopConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_count() {
        let config = StopConfig {
            stop_after_count: Some(0),
            stop_after_secs: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let config = StopConfig {
            stop_after_count: None,
            stop_after_secs: Some(0),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_either_condition() {
        let count_only = StopConfig {
            stop_after_count: Some(1_000),
            stop_after_secs: None,
        };
        assert!(count_only.validate().is_ok());

        let time_only = StopConfig {
            stop_after_count: None,
            stop_after_secs: Some(60),
        };
        assert!(time_only.validate().is_ok());
    }
}
