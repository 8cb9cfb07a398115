//! Randomized auto-recovery scheduling
//!
//! After an emergency disconnect the service registers a one-shot OS task
//! that reconnects the VPN client at a random point in `[base, 2 * base)`
//! seconds. The service keeps no handle on the task once registered.

use chrono::{DateTime, Duration as ChronoDuration, Local};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use unwarp_core::{read_reconnect_base, AuditSink, KeyValueStore, RecoverySchedule};

use crate::capabilities::{RecoveryTask, TaskRegistrar};
use crate::error::Result;

/// Delay for a base: `base + uniform[0, base)`, so always `base <= d < 2 * base`
pub fn compute_delay<R: Rng + ?Sized>(base: u32, rng: &mut R) -> u32 {
    if base == 0 {
        return 0;
    }
    base + rng.gen_range(0..base)
}

/// Unique name for a recovery task registered at `now`
pub fn task_name(now: DateTime<Local>) -> String {
    format!(
        "unwarp-recovery-{}-{}",
        std::process::id(),
        now.timestamp_millis()
    )
}

/// Build the schedule for a delay computed at `now`
pub fn build_schedule(base: u32, delay: u32, now: DateTime<Local>) -> RecoverySchedule {
    RecoverySchedule {
        task_name: task_name(now),
        trigger_time: now + ChronoDuration::seconds(i64::from(delay)),
        base_seconds: base,
        delay_seconds: delay,
    }
}

/// Computes and registers auto-recovery tasks
pub struct RecoveryScheduler {
    settings: Arc<dyn KeyValueStore>,
    registrar: Arc<dyn TaskRegistrar>,
    audit: Arc<dyn AuditSink>,
    reconnect_program: PathBuf,
}

impl RecoveryScheduler {
    pub fn new(
        settings: Arc<dyn KeyValueStore>,
        registrar: Arc<dyn TaskRegistrar>,
        audit: Arc<dyn AuditSink>,
        reconnect_program: PathBuf,
    ) -> Self {
        Self {
            settings,
            registrar,
            audit,
            reconnect_program,
        }
    }

    /// Current base from machine-wide settings, clamped, 7200 when unset
    pub fn base_seconds(&self) -> u32 {
        read_reconnect_base(self.settings.as_ref())
    }

    /// Compute a schedule without registering it
    pub fn plan(&self, base: u32) -> RecoverySchedule {
        let delay = compute_delay(base, &mut rand::thread_rng());
        build_schedule(base, delay, Local::now())
    }

    /// Register a one-shot reconnect `[base, 2 * base)` seconds from now
    pub async fn schedule_auto_recovery(&self, base: u32) -> Result<RecoverySchedule> {
        let schedule = self.plan(base);

        self.audit.info(&format!(
            "Scheduling auto-recovery in {} seconds (at {})",
            schedule.delay_seconds,
            schedule.trigger_time.format("%Y-%m-%d %H:%M:%S")
        ));

        let task = RecoveryTask {
            schedule: schedule.clone(),
            program: self.reconnect_program.clone(),
            args: vec!["connect".to_string()],
        };
        self.registrar.register(&task).await?;

        info!("Auto-recovery task scheduled: {}", schedule.task_name);
        self.audit.info(&format!(
            "Auto-recovery task scheduled successfully: {}",
            schedule.task_name
        ));
        Ok(schedule)
    }
}
