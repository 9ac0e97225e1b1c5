//! Error types for queue, scheduler and lock operations.

use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Deserialization failed: {0}")]
    Deserialization(#[from] DeserializationError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl QueueError {
    /// Check if error is transient and the operation may succeed when repeated
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Store(e) => e.is_transient(),
            Self::Deserialization(_) => false,
            Self::Lock(e) => e.is_transient(),
            Self::Configuration(_) => false,
        }
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Store(StoreError::Connection { .. }) => Some(Duration::from_secs(5)),
            Self::Lock(e) if e.is_transient() => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Failures reported by the backing store while executing a procedure
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store does not have the procedure body cached under this hash
    #[error("Procedure {sha} is not cached by the store")]
    NoScript { sha: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Procedure '{procedure}' failed: {message}")]
    Procedure { procedure: String, message: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::NoScript { .. })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::NoScriptError {
            return Self::NoScript {
                sha: err.detail().unwrap_or_default().to_string(),
            };
        }

        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            return Self::Connection {
                message: err.to_string(),
            };
        }

        Self::Procedure {
            procedure: err.code().unwrap_or("redis").to_string(),
            message: err.to_string(),
        }
    }
}

/// A store reply that could not be parsed into the expected structure
#[derive(Debug, Error)]
pub enum DeserializationError {
    /// The reply was text but not a valid document of the expected type
    #[error("reply of '{procedure}' is malformed: {source}")]
    Malformed {
        procedure: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("reply of '{procedure}' is not {expected}")]
    UnexpectedShape {
        procedure: String,
        expected: &'static str,
    },
}

impl DeserializationError {
    /// Name of the procedure whose reply was rejected
    pub fn procedure(&self) -> &str {
        match self {
            Self::Malformed { procedure, .. } | Self::UnexpectedShape { procedure, .. } => {
                procedure
            }
        }
    }
}

/// Lease acquisition and release failures
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to acquire lock '{name}': {source}")]
    Acquire {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to release lock '{name}': {source}")]
    Release {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("Unusable reply for lock '{name}': {source}")]
    Reply {
        name: String,
        #[source]
        source: DeserializationError,
    },
}

impl LockError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Acquire { source, .. } | Self::Release { source, .. } => source.is_transient(),
            Self::Reply { .. } => false,
        }
    }

    /// Name of the lock the failure relates to
    pub fn lock_name(&self) -> &str {
        match self {
            Self::Acquire { name, .. } | Self::Release { name, .. } | Self::Reply { name, .. } => {
                name
            }
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

/// Validation errors, detected before anything reaches the store
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
