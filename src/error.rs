//! Error types for the model runner

use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Main error type for the model runner
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Model not created")]
    ModelNotCreated,

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Unsupported metric: {0}")]
    UnsupportedMetric(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl RunnerError {
    /// Shorthand for a rejected hyperparameter
    pub fn invalid_param(name: &str, value: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        RunnerError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn length_mismatch(expected: usize, actual: usize) -> Self {
        RunnerError::ShapeError {
            expected: format!("y length = {}", expected),
            actual: format!("y length = {}", actual),
        }
    }
}

impl From<polars::error::PolarsError> for RunnerError {
    fn from(err: polars::error::PolarsError) -> Self {
        RunnerError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        RunnerError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for RunnerError {
    fn from(err: ndarray::ShapeError) -> Self {
        RunnerError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RunnerError::ConfigError("no entry for 'rf'".to_string());
        assert_eq!(err.to_string(), "Configuration error: no entry for 'rf'");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RunnerError = io_err.into();
        assert!(matches!(err, RunnerError::IoError(_)));
    }

    #[test]
    fn test_invalid_param_display() {
        let err = RunnerError::invalid_param("max_depth", -1, "must be positive");
        assert_eq!(err.to_string(), "Invalid parameter: max_depth = -1, must be positive");
    }
}
