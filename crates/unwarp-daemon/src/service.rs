//! Service lifecycle: start the channel worker, stop it within a bound

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use unwarp_core::AuditSink;

use crate::error::{DaemonError, Result};
use crate::ipc::IpcServer;

/// Running control-channel worker
pub struct ServiceHandle {
    stop_tx: watch::Sender<bool>,
    worker: JoinHandle<Result<()>>,
    audit: Arc<dyn AuditSink>,
}

impl ServiceHandle {
    /// Spawn the single worker task that serves the channel
    pub fn start(server: IpcServer, audit: Arc<dyn AuditSink>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(async move { server.run(stop_rx).await });

        audit.info("Unwarp service started");
        Self {
            stop_tx,
            worker,
            audit,
        }
    }

    /// Whether the worker has exited on its own
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker to exit without asking it to stop
    pub async fn join(self) -> Result<()> {
        self.worker
            .await
            .map_err(|e| DaemonError::Ipc(format!("Worker task failed: {}", e)))?
    }

    /// Signal the worker and wait up to `grace` for it to finish
    ///
    /// A disconnect already in progress is never cancelled. If it outlasts
    /// the grace period the worker is detached and keeps running until the
    /// runtime shuts down.
    pub async fn stop(self, grace: Duration) -> Result<()> {
        let _ = self.stop_tx.send(true);

        let result = match tokio::time::timeout(grace, self.worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DaemonError::Ipc(format!("Worker task failed: {}", e))),
            Err(_) => {
                warn!("Worker did not stop within {:?}, detaching it", grace);
                Err(DaemonError::Timeout)
            }
        };

        match &result {
            Ok(()) => {
                info!("Service stopped");
                self.audit.info("Unwarp service stopped");
            }
            Err(e) => {
                error!("Service stopped with error: {}", e);
                self.audit.error(&format!("Unwarp service stopped with error: {}", e));
            }
        }
        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::orchestrator::Orchestrator;
    use crate::testing::FakeSystem;
    use unwarp_core::{MemoryAuditSink, MemoryStore};

    #[tokio::test]
    async fn test_stop_within_grace() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = DaemonConfig {
            ipc_socket_path: temp_dir.path().join("unwarp.sock"),
            ..DaemonConfig::default()
        };
        let audit = Arc::new(MemoryAuditSink::new());
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            Arc::new(FakeSystem::healthy()).capabilities(),
            Arc::new(MemoryStore::new()),
            audit.clone(),
        ));
        let server = IpcServer::new(&config, orchestrator, audit.clone());

        let handle = ServiceHandle::start(server, audit.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        handle.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(audit.matching("Unwarp service stopped").len(), 1);
    }

    #[tokio::test]
    async fn test_stop_past_grace_lets_disconnect_finish() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::UnixStream;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = DaemonConfig {
            ipc_socket_path: temp_dir.path().join("unwarp.sock"),
            adapter_settle_ms: 0,
            ..DaemonConfig::default()
        };
        let mut fake = FakeSystem::healthy();
        fake.flush_delay = Duration::from_millis(300);
        let fake = Arc::new(fake);
        let audit = Arc::new(MemoryAuditSink::new());
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            fake.capabilities(),
            Arc::new(MemoryStore::new()),
            audit.clone(),
        ));
        let server = IpcServer::new(&config, orchestrator, audit.clone());
        let handle = ServiceHandle::start(server, audit.clone());

        let path = config.ipc_socket_path.clone();
        let client = tokio::spawn(async move {
            let mut stream = loop {
                match UnixStream::connect(&path).await {
                    Ok(stream) => break stream,
                    Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            };
            stream.write_all(b"DISCONNECT\n").await.unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await.unwrap();
            line
        });

        while !fake.journal().iter().any(|e| e == "flush_dns") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(matches!(
            handle.stop(Duration::from_millis(10)).await,
            Err(DaemonError::Timeout)
        ));

        let line = tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "SUCCESS\n");
        assert!(fake.journal().iter().any(|e| e == "adapter eth0 up"));
    }
}
