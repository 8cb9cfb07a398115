//! IPC server implementation

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use unwarp_core::{AuditSink, ServiceCommand, ServiceResponse};

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::orchestrator::Orchestrator;

use super::connection::{ChannelListener, PlatformListener};

/// Longest request line accepted; commands are a single short word
const MAX_REQUEST_BYTES: u64 = 1024;

/// IPC server
pub struct IpcServer {
    /// Socket path or pipe name
    socket_path: PathBuf,

    /// Runs the disconnect pipeline for `DISCONNECT`
    orchestrator: Arc<Orchestrator>,

    audit: Arc<dyn AuditSink>,

    request_timeout: Duration,

    accept_retry_delay: Duration,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(
        config: &DaemonConfig,
        orchestrator: Arc<Orchestrator>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            socket_path: config.ipc_socket_path.clone(),
            orchestrator,
            audit,
            request_timeout: config.request_timeout(),
            accept_retry_delay: config.accept_retry_delay(),
        }
    }

    /// Serve connections one at a time until `shutdown` flips to `true`
    ///
    /// Each connection is handled inline, so two disconnects never overlap.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut listener = PlatformListener::claim(&self.socket_path).await?;

        info!("IPC server listening on {:?}", self.socket_path);

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone, nobody left to stop us
                        break;
                    }
                }
                accepted = listener.next_client() => match accepted {
                    Ok(stream) => {
                        if let Err(e) = self.handle_connection(stream).await {
                            warn!("Connection error: {}", e);
                            tokio::time::sleep(self.accept_retry_delay).await;
                        }
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(self.accept_retry_delay).await;
                    }
                },
            }
        }

        info!("IPC server stopping");
        listener.release().await?;
        Ok(())
    }

    /// One request, one response, then the connection is closed
    async fn handle_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader).take(MAX_REQUEST_BYTES);
        let mut raw = Vec::new();

        tokio::time::timeout(self.request_timeout, reader.read_until(b'\n', &mut raw))
            .await
            .map_err(|_| DaemonError::Timeout)??;

        let line = String::from_utf8_lossy(&raw);
        let response = self.respond(&line).await;

        writer
            .write_all(format!("{}\n", response).as_bytes())
            .await?;
        writer.flush().await?;
        writer.shutdown().await?;
        Ok(())
    }

    /// Map one request line to its response
    pub async fn respond(&self, line: &str) -> ServiceResponse {
        match line.parse::<ServiceCommand>() {
            Ok(ServiceCommand::Status) => {
                debug!("Status request");
                ServiceResponse::Ready
            }
            Ok(ServiceCommand::Disconnect) => {
                self.audit.info("Received command: DISCONNECT");
                let run = AssertUnwindSafe(self.orchestrator.perform_emergency_disconnect());
                match run.catch_unwind().await {
                    Ok(outcome) => outcome.response(),
                    Err(_) => {
                        error!("Emergency disconnect aborted by a panic");
                        self.audit.error("Emergency disconnect could not run to completion");
                        ServiceResponse::Failed
                    }
                }
            }
            Err(_) => {
                self.audit
                    .warning(&format!("Invalid command received: {:?}", line.trim_end()));
                ServiceResponse::InvalidCommand
            }
        }
    }
}
