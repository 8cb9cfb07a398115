//! IPC client implementation

use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::Instant;
use tracing::debug;

use unwarp_core::{ServiceCommand, ServiceResponse};

use crate::error::{DaemonError, Result};

use super::connection::{open_channel, ClientStream};

/// Connect bound for the `STATUS` check
pub const STATUS_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connect bound for real commands; the service may still be starting
pub const COMMAND_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on waiting for the service's answer to a command
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Client side of the control channel
///
/// Every failure surfaces as [`DaemonError::ServiceUnavailable`]; the detail
/// goes to the debug log.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    socket_path: PathBuf,
    response_timeout: Duration,
}

impl ServiceClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Whether the service answers `READY`
    pub async fn status(&self) -> bool {
        matches!(
            self.exchange(ServiceCommand::Status, STATUS_CONNECT_TIMEOUT)
                .await,
            Ok(ServiceResponse::Ready)
        )
    }

    /// Send one command and return the service's answer
    pub async fn send_command(&self, command: ServiceCommand) -> Result<ServiceResponse> {
        self.exchange(command, COMMAND_CONNECT_TIMEOUT).await
    }

    /// Ask the service to run the emergency disconnect
    pub async fn disconnect(&self) -> Result<ServiceResponse> {
        self.send_command(ServiceCommand::Disconnect).await
    }

    async fn exchange(
        &self,
        command: ServiceCommand,
        connect_timeout: Duration,
    ) -> Result<ServiceResponse> {
        self.try_exchange(command, connect_timeout)
            .await
            .map_err(|e| {
                debug!("{} exchange failed: {}", command, e);
                DaemonError::ServiceUnavailable
            })
    }

    async fn try_exchange(
        &self,
        command: ServiceCommand,
        connect_timeout: Duration,
    ) -> Result<ServiceResponse> {
        let stream = self.connect(connect_timeout).await?;

        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        writer
            .write_all(format!("{}\n", command).as_bytes())
            .await?;
        writer.flush().await?;

        let mut line = String::new();
        tokio::time::timeout(self.response_timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| DaemonError::Timeout)??;

        Ok(line.parse::<ServiceResponse>()?)
    }

    /// Retry until the single pipe instance is free or the bound elapses
    async fn connect(&self, timeout: Duration) -> Result<ClientStream> {
        let deadline = Instant::now() + timeout;
        loop {
            match open_channel(&self.socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(e) => {
                    debug!("Connect to {:?} failed, retrying: {}", self.socket_path, e);
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_service_is_unavailable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let client = ServiceClient::new(temp_dir.path().join("absent.sock"));

        assert!(!client.status().await);
        assert!(matches!(
            client.disconnect().await,
            Err(DaemonError::ServiceUnavailable)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_garbled_reply_is_unavailable() {
        use tokio::net::UnixListener;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("fake.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut line = String::new();
            BufReader::new(&mut stream).read_line(&mut line).await.unwrap();
            stream.write_all(b"MAYBE\n").await.unwrap();
        });

        let client = ServiceClient::new(path);
        assert!(matches!(
            client.disconnect().await,
            Err(DaemonError::ServiceUnavailable)
        ));
    }
}
