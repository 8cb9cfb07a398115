//! One-shot recovery task registration with the OS scheduler

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::info;

use crate::capabilities::{RecoveryTask, TaskRegistrar};
use crate::error::Result;

use super::command::capture;

const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Registers recovery tasks with Task Scheduler or systemd timers
#[derive(Debug, Default, Clone)]
pub struct SystemTaskRegistrar;

impl SystemTaskRegistrar {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait]
impl TaskRegistrar for SystemTaskRegistrar {
    async fn register(&self, task: &RecoveryTask) -> Result<()> {
        let args = systemd_run_args(task);
        capture("systemd-run", &args, REGISTER_TIMEOUT)
            .await?
            .require_success("systemd-run")?;
        info!(
            "Registered timer {} for {}",
            task.schedule.task_name, task.schedule.trigger_time
        );
        Ok(())
    }
}

#[cfg(windows)]
#[async_trait]
impl TaskRegistrar for SystemTaskRegistrar {
    async fn register(&self, task: &RecoveryTask) -> Result<()> {
        let xml = render_task_xml(task);
        let xml_path = std::env::temp_dir().join(format!("{}.xml", task.schedule.task_name));

        // schtasks expects the declared UTF-16 encoding, with a BOM
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend(xml.encode_utf16().flat_map(|unit| unit.to_le_bytes()));
        std::fs::write(&xml_path, bytes)?;

        let xml_arg = xml_path.to_string_lossy().to_string();
        let result = capture(
            "schtasks",
            &[
                "/create",
                "/tn",
                task.schedule.task_name.as_str(),
                "/xml",
                xml_arg.as_str(),
                "/f",
            ],
            REGISTER_TIMEOUT,
        )
        .await;

        if let Err(e) = std::fs::remove_file(&xml_path) {
            tracing::debug!("Could not remove {:?}: {}", xml_path, e);
        }

        result?.require_success("schtasks /create")?;
        info!(
            "Registered task {} for {}",
            task.schedule.task_name, task.schedule.trigger_time
        );
        Ok(())
    }
}

/// Arguments for a transient `systemd-run` timer that fires once
///
/// `--collect` unloads the transient units after they run, so nothing is left
/// registered afterwards.
pub fn systemd_run_args(task: &RecoveryTask) -> Vec<String> {
    let mut args = vec![
        format!("--unit={}", task.schedule.task_name),
        format!("--on-active={}s", task.schedule.delay_seconds),
        "--timer-property=AccuracySec=1s".to_string(),
        "--collect".to_string(),
        "--".to_string(),
        task.program.to_string_lossy().to_string(),
    ];
    args.extend(task.args.iter().cloned());
    args
}

/// Task Scheduler definition that runs the reconnect as SYSTEM and then
/// deletes its own registration
pub fn render_task_xml(task: &RecoveryTask) -> String {
    let start = format_boundary(&task.schedule.trigger_time);
    let command = xml_escape(&task.program.to_string_lossy());
    let arguments = xml_escape(&task.args.join(" "));
    let name = xml_escape(&task.schedule.task_name);

    format!(
        r#"<?xml version="1.0" encoding="UTF-16"?>
<Task version="1.2" xmlns="http://schemas.microsoft.com/windows/2004/02/mit/task">
  <RegistrationInfo>
    <Description>Unwarp auto-recovery: reconnects WARP after an emergency disconnect</Description>
  </RegistrationInfo>
  <Triggers>
    <TimeTrigger>
      <StartBoundary>{start}</StartBoundary>
      <Enabled>true</Enabled>
    </TimeTrigger>
  </Triggers>
  <Principals>
    <Principal>
      <UserId>S-1-5-18</UserId>
      <RunLevel>HighestAvailable</RunLevel>
    </Principal>
  </Principals>
  <Settings>
    <DeleteExpiredTaskAfter>PT1M</DeleteExpiredTaskAfter>
    <ExecutionTimeLimit>PT5M</ExecutionTimeLimit>
    <StartWhenAvailable>true</StartWhenAvailable>
  </Settings>
  <Actions Context="Author">
    <Exec>
      <Command>{command}</Command>
      <Arguments>{arguments}</Arguments>
    </Exec>
    <Exec>
      <Command>schtasks.exe</Command>
      <Arguments>/delete /tn "{name}" /f</Arguments>
    </Exec>
  </Actions>
</Task>
"#
    )
}

fn format_boundary(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use unwarp_core::RecoverySchedule;

    fn sample_task() -> RecoveryTask {
        RecoveryTask {
            schedule: RecoverySchedule {
                task_name: "unwarp-recovery-42-1700000000000".to_string(),
                trigger_time: Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
                base_seconds: 60,
                delay_seconds: 90,
            },
            program: PathBuf::from(r"C:\Program Files\Cloudflare\Cloudflare WARP\warp-cli.exe"),
            args: vec!["connect".to_string()],
        }
    }

    #[test]
    fn test_systemd_run_args() {
        let args = systemd_run_args(&sample_task());
        assert_eq!(args[0], "--unit=unwarp-recovery-42-1700000000000");
        assert_eq!(args[1], "--on-active=90s");
        assert!(args.contains(&"--collect".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("connect"));
    }

    #[test]
    fn test_task_xml_contents() {
        let xml = render_task_xml(&sample_task());
        assert!(xml.contains("<StartBoundary>2026-03-04T05:06:07</StartBoundary>"));
        assert!(xml.contains("<UserId>S-1-5-18</UserId>"));
        assert!(xml.contains("<Arguments>connect</Arguments>"));
        assert!(xml.contains(r#"/delete /tn "unwarp-recovery-42-1700000000000" /f"#));
    }

    #[test]
    fn test_task_xml_escapes_values() {
        let mut task = sample_task();
        task.program = PathBuf::from("C:\\A&B\\<warp>.exe");
        let xml = render_task_xml(&task);
        assert!(xml.contains("C:\\A&amp;B\\&lt;warp&gt;.exe"));
    }
}
