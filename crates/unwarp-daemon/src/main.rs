//! Unwarp Daemon - Main entry point
//!
//! Serves the control channel until the service manager asks it to stop.

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unwarp_core::{AuditSink, FanoutAuditSink, FileAuditSink, JsonFileStore, TracingAuditSink};
use unwarp_daemon::{system, DaemonConfig, IpcServer, Orchestrator, ServiceHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unwarp_daemon=info,unwarp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Unwarp daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = DaemonConfig::default_config_path();
    let config = if config_path.exists() {
        DaemonConfig::load(&config_path)?
    } else {
        let config = DaemonConfig::default();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(&config_path)?;
        info!("Created default config at {:?}", config_path);
        config
    };

    config.ensure_directories()?;

    let audit: Arc<dyn AuditSink> = Arc::new(FanoutAuditSink::new(vec![
        Arc::new(TracingAuditSink::new("service")),
        Arc::new(FileAuditSink::new(config.audit_log_path.clone(), "service")),
    ]));
    let settings = Arc::new(JsonFileStore::new(config.settings_path.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        system::platform_capabilities(&config),
        settings,
        Arc::clone(&audit),
    ));
    let server = IpcServer::new(&config, orchestrator, Arc::clone(&audit));
    let handle = ServiceHandle::start(server, Arc::clone(&audit));

    info!("Daemon started successfully");

    // Wait for shutdown signal, or for the worker to die on its own
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
        }
        _ = wait_for_exit(&handle) => {
            error!("IPC server exited unexpectedly");
            return handle.join().await.map_err(Into::into);
        }
    }

    info!("Daemon shutting down");
    handle.stop(config.shutdown_grace()).await?;

    Ok(())
}

async fn wait_for_exit(handle: &ServiceHandle) {
    while !handle.is_finished() {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(windows)]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
