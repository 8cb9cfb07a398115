//! Unwarp Daemon - Privileged side of the break-glass VPN disconnect tool
//!
//! This crate provides:
//! - The control channel server and its client stub
//! - The emergency disconnect pipeline
//! - Randomized auto-recovery scheduling
//! - Capability traits and their OS-backed implementations

pub mod capabilities;
pub mod config;
pub mod error;
pub mod ipc;
pub mod orchestrator;
pub mod recovery;
pub mod service;
pub mod system;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use capabilities::{
    Capabilities, CliInvoker, CommandOutcome, NetworkControl, ProcessTerminator, RecoveryTask,
    TaskRegistrar,
};
pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
pub use ipc::{IpcServer, ServiceClient};
pub use orchestrator::Orchestrator;
pub use recovery::RecoveryScheduler;
pub use service::ServiceHandle;
