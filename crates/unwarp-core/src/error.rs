//! Error types for the unwarp core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Alias kept for call sites that only care about "the core error"
pub type Error = CoreError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Reconnect base must be between {min} and {max} seconds (got {got})")]
    ReconnectOutOfRange { got: i64, min: u32, max: u32 },

    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("Unknown response: {0:?}")]
    UnknownResponse(String),
}
