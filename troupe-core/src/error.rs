//! Error types for the coordination engine.
//!
//! Each external collaborator gets its own error enum so callers can decide
//! which failures are fatal and which degrade to "no visible effect".

use std::time::Duration;
use thiserror::Error;

/// Errors from the persistent store and its typed adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Row for table {table} is not a JSON object")]
    NotAnObject { table: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Errors from a generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Required credentials or endpoints are missing. Never retried.
    #[error("Generation service unavailable: {0}")]
    Unavailable(String),

    #[error("Generation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse generation response: {0}")]
    Parse(String),

    #[error("Generation produced no text")]
    Empty,
}

/// Errors from the notification sink.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Failed to load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
}

/// Umbrella error for engine-level operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GenerationError::Unavailable("ANTHROPIC_API_KEY not set".to_string());
        assert_eq!(
            err.to_string(),
            "Generation service unavailable: ANTHROPIC_API_KEY not set"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: EngineError = StoreError::Backend("connection reset".to_string()).into();
        assert!(matches!(err, EngineError::Store(_)));
    }
}
