//! Unwarp - break-glass Cloudflare WARP disconnect client

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unwarp_cli::auth::{AuthGate, BiometricVerifier, PasswordVerifier, TerminalPrompt};
use unwarp_cli::policy::{current_user, PermissionStatus};
use unwarp_cli::{Cli, Session, UnwarpClient};
use unwarp_core::{AuditSink, FanoutAuditSink, FileAuditSink, JsonFileStore, TracingAuditSink};
use unwarp_daemon::DaemonConfig;

/// Break-glass password hash, next to the machine-wide settings
fn credential_path() -> PathBuf {
    DaemonConfig::default_data_dir().join("breakglass.phc")
}

/// Per-operator rate-limit record
fn auth_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(DaemonConfig::default_data_dir)
        .join("unwarp")
        .join("auth_state.json")
}

fn load_config() -> DaemonConfig {
    let path = DaemonConfig::default_config_path();
    match DaemonConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            debug!("Using default config ({:?}: {})", path, e);
            DaemonConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unwarp=warn,unwarp_cli=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config();
    let audit: Arc<dyn AuditSink> = Arc::new(FanoutAuditSink::new(vec![
        Arc::new(TracingAuditSink::new("client")),
        Arc::new(FileAuditSink::new(config.audit_log_path.clone(), "client")),
    ]));

    let prompt = Arc::new(TerminalPrompt);
    let gate = AuthGate::new(
        Arc::new(JsonFileStore::new(auth_state_path())),
        Arc::new(BiometricVerifier::default()),
        Arc::new(PasswordVerifier::new(credential_path(), prompt.clone())),
        Arc::clone(&audit),
    );

    let socket = cli
        .socket
        .clone()
        .unwrap_or_else(|| config.ipc_socket_path.clone());
    let session = Session {
        operator: current_user(),
        permissions: PermissionStatus::current(),
        gate,
        settings: Arc::new(JsonFileStore::new(config.settings_path.clone())),
        client: UnwarpClient::with_socket_path(socket),
        config,
        audit,
    };

    let result = if cli.enroll_password {
        session
            .enroll_password(&credential_path(), prompt.as_ref())
            .await
    } else {
        session.run(&cli).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
