//! Client for communicating with the unwarp service

use std::path::PathBuf;

use unwarp_core::ServiceResponse;
use unwarp_daemon::{DaemonConfig, DaemonError, ServiceClient};

use crate::auth::{AuthError, DenyReason};

/// Error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Access denied: {0}")]
    PolicyDenied(String),

    #[error("{reason}. Please wait {wait_seconds} seconds.")]
    RateLimited {
        reason: DenyReason,
        wait_seconds: u64,
    },

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Authentication canceled")]
    AuthenticationCanceled,

    #[error("Unwarp service is not running or not responding")]
    ServiceUnavailable,

    #[error("Service reported: {0}")]
    DisconnectFailed(ServiceResponse),

    #[error("Credential error: {0}")]
    Credential(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    fn from_daemon_error(e: DaemonError) -> Self {
        tracing::debug!("Service exchange failed: {}", e);
        ClientError::ServiceUnavailable
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for the unwarp service
#[derive(Debug, Clone)]
pub struct UnwarpClient {
    inner: ServiceClient,
}

impl UnwarpClient {
    /// Create a new client with the default channel path
    pub fn new() -> Self {
        Self::with_socket_path(DaemonConfig::default_ipc_path())
    }

    /// Create a new client with a specific socket path or pipe name
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            inner: ServiceClient::new(socket_path),
        }
    }

    /// Whether the service answers `STATUS`
    pub async fn is_running(&self) -> bool {
        self.inner.status().await
    }

    /// Ask the service to tear down the VPN connection
    pub async fn disconnect(&self) -> Result<()> {
        match self
            .inner
            .disconnect()
            .await
            .map_err(ClientError::from_daemon_error)?
        {
            ServiceResponse::Success => Ok(()),
            other => Err(ClientError::DisconnectFailed(other)),
        }
    }
}

impl Default for UnwarpClient {
    fn default() -> Self {
        Self::new()
    }
}
