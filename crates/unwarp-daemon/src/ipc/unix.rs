//! Unix domain socket endpoint

use async_trait::async_trait;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use crate::error::{DaemonError, Result};

use super::connection::ChannelListener;

/// Client side of the socket
pub type ClientStream = UnixStream;

/// Owner-only access; the service runs as root
const SOCKET_MODE: u32 = 0o600;

/// Listening socket plus the path it owns
pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
}

#[async_trait]
impl ChannelListener for SocketListener {
    type Stream = UnixStream;

    async fn claim(endpoint: &Path) -> Result<Self> {
        if endpoint.exists() {
            if UnixStream::connect(endpoint).await.is_ok() {
                return Err(DaemonError::Ipc(format!(
                    "{:?} is already served by a running instance",
                    endpoint
                )));
            }
            debug!("Removing stale socket {:?}", endpoint);
            std::fs::remove_file(endpoint)?;
        }
        if let Some(parent) = endpoint.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(endpoint)
            .map_err(|e| DaemonError::Ipc(format!("Cannot bind {:?}: {}", endpoint, e)))?;
        std::fs::set_permissions(endpoint, std::fs::Permissions::from_mode(SOCKET_MODE))?;

        Ok(Self {
            listener,
            path: endpoint.to_path_buf(),
        })
    }

    async fn next_client(&mut self) -> Result<UnixStream> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| DaemonError::Ipc(format!("Accept failed: {}", e)))?;
        Ok(stream)
    }

    async fn release(self) -> Result<()> {
        drop(self.listener);
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed socket {:?}", self.path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

/// Connect to the service's socket
pub async fn open_channel(endpoint: &Path) -> Result<ClientStream> {
    UnixStream::connect(endpoint)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => DaemonError::ServiceUnavailable,
            _ => DaemonError::Ipc(format!("Cannot connect to {:?}: {}", endpoint, e)),
        })
}
