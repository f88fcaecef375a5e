use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range.
    #[error("`{field}` is invalid: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// No stop condition is configured.
    #[error("at least one of `stop_after_count` or `stop_after_secs` must be set")]
    NoStopCondition,
    /// The harness has no workers to run.
    #[error("at least one producer or consumer must be configured")]
    NoWorkers,
}

impl ValidationError {
    /// Creates an [`ValidationError::InvalidFieldValue`] for the given field.
    pub fn invalid_field(field: &str, constraint: &str) -> Self {
        ValidationError::InvalidFieldValue {
            field: field.to_string(),
            constraint: constraint.to_string(),
        }
    }
}
