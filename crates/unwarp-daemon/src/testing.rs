//! Scriptable in-memory capabilities for tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::capabilities::{
    Capabilities, CliInvoker, CommandOutcome, NetworkControl, ProcessTerminator, RecoveryTask,
    TaskRegistrar,
};
use crate::error::{DaemonError, Result};

/// Fake host: every field scripts one behavior, every call is journaled
#[derive(Debug, Default)]
pub struct FakeSystem {
    /// Outcome of the CLI; `None` behaves like a missing binary
    pub cli_outcome: Option<CommandOutcome>,
    /// Running processes by name
    pub processes: HashMap<String, Vec<u32>>,
    /// PIDs that refuse to die
    pub stubborn_pids: HashSet<u32>,
    pub fail_flush: bool,
    pub panic_on_flush: bool,
    /// How long the flush takes
    pub flush_delay: Duration,
    pub fail_dns_restart: bool,
    /// Connected adapters; `None` makes enumeration fail
    pub adapters: Option<Vec<String>>,
    /// Adapter whose reset fails
    pub failing_adapter: Option<String>,
    /// Adapter whose reset panics
    pub panic_on_adapter: Option<String>,
    pub fail_register: bool,

    journal: Mutex<Vec<String>>,
    registered: Mutex<Vec<RecoveryTask>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeSystem {
    /// A host where every action succeeds
    pub fn healthy() -> Self {
        let mut processes = HashMap::new();
        processes.insert("warp-svc".to_string(), vec![4242]);
        processes.insert("warp-taskbar".to_string(), vec![4343]);
        processes.insert("Cloudflare WARP".to_string(), vec![4444]);
        processes.insert("CloudflareWARP".to_string(), vec![4545]);
        Self {
            cli_outcome: Some(CommandOutcome::Exited(Some(0))),
            processes,
            adapters: Some(vec!["eth0".to_string()]),
            ..Default::default()
        }
    }

    /// A host where every action fails without panicking
    pub fn broken() -> Self {
        Self {
            cli_outcome: Some(CommandOutcome::TimedOut),
            fail_flush: true,
            fail_dns_restart: true,
            adapters: None,
            fail_register: true,
            ..Default::default()
        }
    }

    /// Wire this fake into every capability slot
    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities {
            cli: self.clone(),
            processes: self.clone(),
            network: self.clone(),
            registrar: self.clone(),
        }
    }

    /// Calls made so far, in order
    pub fn journal(&self) -> Vec<String> {
        lock(&self.journal).clone()
    }

    /// Tasks handed to the registrar
    pub fn registered(&self) -> Vec<RecoveryTask> {
        lock(&self.registered).clone()
    }

    fn note(&self, entry: String) {
        lock(&self.journal).push(entry);
    }
}

#[async_trait]
impl CliInvoker for FakeSystem {
    async fn invoke(&self, args: &[&str], _timeout: Duration) -> Result<CommandOutcome> {
        self.note(format!("cli {}", args.join(" ")));
        self.cli_outcome.ok_or_else(|| DaemonError::Spawn {
            program: "warp-cli".to_string(),
            reason: "No such file or directory".to_string(),
        })
    }
}

#[async_trait]
impl ProcessTerminator for FakeSystem {
    async fn find(&self, name: &str) -> Result<Vec<u32>> {
        self.note(format!("find {}", name));
        Ok(self.processes.get(name).cloned().unwrap_or_default())
    }

    async fn terminate(&self, pid: u32, wait: Duration) -> Result<()> {
        self.note(format!("kill {}", pid));
        if self.stubborn_pids.contains(&pid) {
            return Err(DaemonError::Capability(format!(
                "process {} still running after {:?}",
                pid, wait
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkControl for FakeSystem {
    async fn flush_dns(&self, _timeout: Duration) -> Result<()> {
        self.note("flush_dns".to_string());
        tokio::time::sleep(self.flush_delay).await;
        if self.panic_on_flush {
            panic!("resolver handle vanished");
        }
        if self.fail_flush {
            return Err(DaemonError::Capability("flush failed (exit code 1)".to_string()));
        }
        Ok(())
    }

    async fn restart_dns_service(&self, service: &str, _state_timeout: Duration) -> Result<()> {
        self.note(format!("restart {}", service));
        if self.fail_dns_restart {
            return Err(DaemonError::Capability(format!(
                "{} did not stop within 30s",
                service
            )));
        }
        Ok(())
    }

    async fn connected_adapters(&self) -> Result<Vec<String>> {
        self.note("list_adapters".to_string());
        self.adapters
            .clone()
            .ok_or_else(|| DaemonError::Capability("adapter enumeration failed".to_string()))
    }

    async fn set_adapter_enabled(&self, adapter: &str, enabled: bool) -> Result<()> {
        self.note(format!(
            "adapter {} {}",
            adapter,
            if enabled { "up" } else { "down" }
        ));
        if self.panic_on_adapter.as_deref() == Some(adapter) {
            panic!("adapter object threw");
        }
        if self.failing_adapter.as_deref() == Some(adapter) {
            return Err(DaemonError::Capability(format!(
                "adapter {} refused to change state",
                adapter
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRegistrar for FakeSystem {
    async fn register(&self, task: &RecoveryTask) -> Result<()> {
        self.note(format!("register {}", task.schedule.task_name));
        if self.fail_register {
            return Err(DaemonError::Capability("registration refused".to_string()));
        }
        lock(&self.registered).push(task.clone());
        Ok(())
    }
}
