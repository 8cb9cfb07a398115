//! Bounded execution of external programs

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::capabilities::CommandOutcome;
use crate::error::{DaemonError, Result};

/// Output of a bounded command
#[derive(Debug, Clone)]
pub struct Captured {
    pub outcome: CommandOutcome,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    /// Turn anything other than a zero exit into an error
    pub fn require_success(self, what: &str) -> Result<Self> {
        match self.outcome {
            CommandOutcome::Exited(Some(0)) => Ok(self),
            CommandOutcome::Exited(code) => {
                let stderr = self.stderr.trim();
                Err(DaemonError::Capability(format!(
                    "{} failed (exit code {}){}",
                    what,
                    code.map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                    if stderr.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", stderr)
                    }
                )))
            }
            CommandOutcome::TimedOut => {
                Err(DaemonError::Capability(format!("{} timed out", what)))
            }
        }
    }
}

/// Run `program` with `args`, capturing output
///
/// The child is killed if it is still running when `timeout` elapses.
pub async fn capture<P, S>(program: P, args: &[S], timeout: Duration) -> Result<Captured>
where
    P: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    let child = command.spawn().map_err(|e| DaemonError::Spawn {
        program: program.to_string_lossy().to_string(),
        reason: e.to_string(),
    })?;

    debug!("Spawned {:?} (pid {:?})", program, child.id());

    // Dropping the wait future on timeout drops the child, which kills it
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(Captured {
            outcome: CommandOutcome::Exited(output.status.code()),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
        Ok(Err(e)) => Err(DaemonError::Io(e)),
        Err(_) => {
            debug!("{:?} exceeded {:?}, killed", program, timeout);
            Ok(Captured {
                outcome: CommandOutcome::TimedOut,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }
}

/// Poll `check` until it returns `true` or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval).await;
    }
}
