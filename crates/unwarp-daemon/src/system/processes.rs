//! Process enumeration and forced termination

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::capabilities::{CommandOutcome, ProcessTerminator};
use crate::error::{DaemonError, Result};

use super::command::{capture, wait_until};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminates processes using the platform's process tools
#[derive(Debug, Default, Clone)]
pub struct SystemProcessTerminator;

impl SystemProcessTerminator {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessTerminator for SystemProcessTerminator {
    async fn find(&self, name: &str) -> Result<Vec<u32>> {
        let captured = capture("pgrep", &["-x", name], LOOKUP_TIMEOUT).await?;
        match captured.outcome {
            // pgrep exits 1 when nothing matched
            CommandOutcome::Exited(Some(1)) => Ok(Vec::new()),
            CommandOutcome::Exited(Some(0)) => Ok(parse_pid_lines(&captured.stdout)),
            _ => Err(captured
                .require_success(&format!("pgrep {}", name))
                .err()
                .unwrap_or_else(|| DaemonError::Capability("pgrep failed".to_string()))),
        }
    }

    async fn terminate(&self, pid: u32, wait: Duration) -> Result<()> {
        let pid_arg = pid.to_string();
        capture("kill", &["-KILL", pid_arg.as_str()], LOOKUP_TIMEOUT)
            .await?
            .require_success(&format!("kill {}", pid))?;

        let exited = wait_until(wait, EXIT_POLL_INTERVAL, || is_gone(pid)).await?;
        if exited {
            debug!("Process {} exited", pid);
            Ok(())
        } else {
            Err(DaemonError::Capability(format!(
                "process {} still running after {:?}",
                pid, wait
            )))
        }
    }
}

#[cfg(unix)]
async fn is_gone(pid: u32) -> Result<bool> {
    let pid_arg = pid.to_string();
    let signal = capture("kill", &["-0", pid_arg.as_str()], LOOKUP_TIMEOUT).await?;
    Ok(!signal.outcome.success())
}

#[cfg(windows)]
#[async_trait]
impl ProcessTerminator for SystemProcessTerminator {
    async fn find(&self, name: &str) -> Result<Vec<u32>> {
        let filter = format!("IMAGENAME eq {}.exe", name);
        let captured = capture(
            "tasklist",
            &["/FI", filter.as_str(), "/FO", "CSV", "/NH"],
            LOOKUP_TIMEOUT,
        )
        .await?
        .require_success("tasklist")?;
        Ok(parse_tasklist_csv(&captured.stdout))
    }

    async fn terminate(&self, pid: u32, wait: Duration) -> Result<()> {
        let pid_arg = pid.to_string();
        capture(
            "taskkill",
            &["/PID", pid_arg.as_str(), "/F"],
            LOOKUP_TIMEOUT,
        )
        .await?
        .require_success(&format!("taskkill {}", pid))?;

        let exited = wait_until(wait, EXIT_POLL_INTERVAL, || is_gone(pid)).await?;
        if exited {
            debug!("Process {} exited", pid);
            Ok(())
        } else {
            Err(DaemonError::Capability(format!(
                "process {} still running after {:?}",
                pid, wait
            )))
        }
    }
}

#[cfg(windows)]
async fn is_gone(pid: u32) -> Result<bool> {
    let filter = format!("PID eq {}", pid);
    let captured = capture(
        "tasklist",
        &["/FI", filter.as_str(), "/FO", "CSV", "/NH"],
        LOOKUP_TIMEOUT,
    )
    .await?
    .require_success("tasklist")?;
    Ok(parse_tasklist_csv(&captured.stdout).is_empty())
}

/// Parse one PID per line (pgrep output)
pub fn parse_pid_lines(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// Parse `tasklist /FO CSV /NH` rows: `"image","pid","session","#","mem"`
///
/// The informational "no tasks" line has no PID column and is skipped.
pub fn parse_tasklist_csv(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split("\",\"");
            let _image = fields.next()?;
            fields.next()?.trim_matches('"').parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pid_lines() {
        assert_eq!(parse_pid_lines("123\n456\n\n"), vec![123, 456]);
        assert!(parse_pid_lines("").is_empty());
    }

    #[test]
    fn test_parse_tasklist_csv() {
        let output = "\"warp-svc.exe\",\"4242\",\"Services\",\"0\",\"35,120 K\"\r\n\
                      \"warp-svc.exe\",\"4243\",\"Services\",\"0\",\"1,024 K\"\r\n";
        assert_eq!(parse_tasklist_csv(output), vec![4242, 4243]);
    }

    #[test]
    fn test_parse_tasklist_no_matches() {
        let output = "INFO: No tasks are running which match the specified criteria.\r\n";
        assert!(parse_tasklist_csv(output).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_find_unknown_process_is_empty() {
        let terminator = SystemProcessTerminator::new();
        // pgrep may be missing in minimal containers; only assert when it ran
        if let Ok(pids) = terminator.find("unwarp-no-such-proc").await {
            assert!(pids.is_empty());
        }
    }
}
