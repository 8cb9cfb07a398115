//! Error types for the unwarp service

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the service
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] unwarp_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IPC error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Service not reachable over the control channel
    #[error("Service not running")]
    ServiceUnavailable,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// External program could not be started
    #[error("Failed to execute {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// External program or capability reported failure
    #[error("{0}")]
    Capability(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}
