//! Capabilities backed by the host operating system
//!
//! Every action shells out to the platform's own tooling with a bounded
//! wait. Output parsers are plain functions so they can be exercised on any
//! platform.

pub mod command;
pub mod network;
pub mod processes;
pub mod scheduler;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::{Capabilities, CliInvoker, CommandOutcome};
use crate::config::DaemonConfig;
use crate::error::Result;

pub use network::SystemNetwork;
pub use processes::SystemProcessTerminator;
pub use scheduler::SystemTaskRegistrar;

/// Runs the WARP command line client
#[derive(Debug, Clone)]
pub struct SystemCli {
    program: PathBuf,
}

impl SystemCli {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl CliInvoker for SystemCli {
    async fn invoke(&self, args: &[&str], timeout: Duration) -> Result<CommandOutcome> {
        let captured = command::capture(&self.program, args, timeout).await?;
        Ok(captured.outcome)
    }
}

/// Capabilities wired to the real system
pub fn platform_capabilities(config: &DaemonConfig) -> Capabilities {
    Capabilities {
        cli: Arc::new(SystemCli::new(config.warp_cli_path.clone())),
        processes: Arc::new(SystemProcessTerminator::new()),
        network: Arc::new(SystemNetwork::new(config.command_timeout())),
        registrar: Arc::new(SystemTaskRegistrar::new()),
    }
}
