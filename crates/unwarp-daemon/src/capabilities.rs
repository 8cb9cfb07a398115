//! Capabilities the disconnect pipeline acts through
//!
//! The orchestrator never touches the OS directly. Each concern sits behind
//! one of these traits so the pipeline can run against the real system
//! (see [`crate::system`]) or against fakes in tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use unwarp_core::RecoverySchedule;

use crate::error::Result;

/// How a bounded external command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The process exited; `None` when it was killed by a signal
    Exited(Option<i32>),
    /// The bound elapsed and the process was killed
    TimedOut,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, CommandOutcome::Exited(Some(0)))
    }
}

/// Invokes the VPN client's own command line tool
#[async_trait]
pub trait CliInvoker: Send + Sync {
    /// Run the CLI with `args`, killing it if it outlives `timeout`
    async fn invoke(&self, args: &[&str], timeout: Duration) -> Result<CommandOutcome>;
}

/// Finds and forcibly terminates processes by name
#[async_trait]
pub trait ProcessTerminator: Send + Sync {
    /// PIDs of every running process named `name`
    async fn find(&self, name: &str) -> Result<Vec<u32>>;

    /// Kill `pid` and wait up to `wait` for it to exit
    async fn terminate(&self, pid: u32, wait: Duration) -> Result<()>;
}

/// DNS and adapter level recovery actions
#[async_trait]
pub trait NetworkControl: Send + Sync {
    /// Flush the resolver cache
    async fn flush_dns(&self, timeout: Duration) -> Result<()>;

    /// Stop `service` (if running) and start it again, waiting up to
    /// `state_timeout` for each transition
    async fn restart_dns_service(&self, service: &str, state_timeout: Duration) -> Result<()>;

    /// Names of adapters currently reporting a connected state
    async fn connected_adapters(&self) -> Result<Vec<String>>;

    /// Administratively enable or disable one adapter
    async fn set_adapter_enabled(&self, adapter: &str, enabled: bool) -> Result<()>;
}

/// One-shot task handed to the OS scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryTask {
    pub schedule: RecoverySchedule,
    /// Program run when the task fires
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Registers durable one-shot tasks that outlive the service
///
/// Registration is fire-and-forget: the service keeps no handle to the task.
/// Implementations must make the task delete its own registration after it
/// has run.
#[async_trait]
pub trait TaskRegistrar: Send + Sync {
    async fn register(&self, task: &RecoveryTask) -> Result<()>;
}

/// The full set of capabilities a disconnect needs
#[derive(Clone)]
pub struct Capabilities {
    pub cli: Arc<dyn CliInvoker>,
    pub processes: Arc<dyn ProcessTerminator>,
    pub network: Arc<dyn NetworkControl>,
    pub registrar: Arc<dyn TaskRegistrar>,
}
