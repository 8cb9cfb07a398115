//! Emergency disconnect pipeline
//!
//! Runs an ordered list of independent steps. A failing step becomes a
//! failed [`StepResult`] plus an audit warning and the pipeline moves on.
//! Auto-recovery scheduling always runs last.
//!
//! The overall outcome is optimistic: it is `true` whenever the pipeline ran
//! to completion, even if every step failed. A sub-action that panics is
//! contained and recorded as a failed step like any other error.

use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use unwarp_core::{AuditSink, DisconnectOutcome, KeyValueStore, StepResult};

use crate::capabilities::{Capabilities, CommandOutcome};
use crate::config::DaemonConfig;
use crate::recovery::RecoveryScheduler;

/// Drives one emergency disconnect at a time
pub struct Orchestrator {
    config: DaemonConfig,
    capabilities: Capabilities,
    scheduler: RecoveryScheduler,
    audit: Arc<dyn AuditSink>,
}

impl Orchestrator {
    pub fn new(
        config: DaemonConfig,
        capabilities: Capabilities,
        settings: Arc<dyn KeyValueStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let scheduler = RecoveryScheduler::new(
            settings,
            capabilities.registrar.clone(),
            audit.clone(),
            config.warp_cli_path.clone(),
        );
        Self {
            config,
            capabilities,
            scheduler,
            audit,
        }
    }

    /// Run every step in order and reduce them to an outcome
    pub async fn perform_emergency_disconnect(&self) -> DisconnectOutcome {
        self.audit.info("Emergency disconnect initiated");

        let mut outcome = DisconnectOutcome {
            steps: Vec::new(),
            overall: true,
        };

        self.run_step(&mut outcome, "cli.disconnect", self.cli_disconnect())
            .await;
        self.run_step(&mut outcome, "processes.terminate", self.terminate_processes())
            .await;
        self.run_step(&mut outcome, "network.recover", self.recover_network())
            .await;
        self.run_step(&mut outcome, "recovery.schedule", self.schedule_recovery())
            .await;

        let failed = outcome.failures().count();
        info!(
            "Emergency disconnect finished: {} steps, {} failed, overall {}",
            outcome.steps.len(),
            failed,
            outcome.overall
        );
        self.audit.info(&format!(
            "Emergency disconnect completed ({} of {} steps failed)",
            failed,
            outcome.steps.len()
        ));

        outcome
    }

    /// Await one step group and audit each failed result
    async fn run_step<F>(&self, outcome: &mut DisconnectOutcome, label: &str, step: F)
    where
        F: Future<Output = Vec<StepResult>>,
    {
        let results = match AssertUnwindSafe(step).catch_unwind().await {
            Ok(results) => results,
            // Sub-actions contain their own panics; this only catches the glue
            Err(panic) => vec![panicked(label, panic)],
        };
        for result in results {
            if !result.succeeded {
                warn!("{}", result.failure_message());
                self.audit.warning(&result.failure_message());
            }
            outcome.steps.push(result);
        }
    }

    async fn cli_disconnect(&self) -> Vec<StepResult> {
        vec![contained("cli.disconnect", self.invoke_cli_disconnect()).await]
    }

    async fn invoke_cli_disconnect(&self) -> StepResult {
        const STEP: &str = "cli.disconnect";
        let timeout = self.config.cli_timeout();

        match self.capabilities.cli.invoke(&["disconnect"], timeout).await {
            Ok(CommandOutcome::Exited(Some(0))) => StepResult::ok(STEP, "warp-cli disconnect completed"),
            Ok(CommandOutcome::Exited(code)) => StepResult::failed(
                STEP,
                format!("warp-cli disconnect exited with {:?}", code),
            ),
            Ok(CommandOutcome::TimedOut) => StepResult::failed(
                STEP,
                format!("warp-cli disconnect timed out after {:?} and was killed", timeout),
            ),
            Err(e) => StepResult::failed(STEP, e.to_string()),
        }
    }

    async fn terminate_processes(&self) -> Vec<StepResult> {
        let mut results = Vec::with_capacity(self.config.process_names.len());
        for name in &self.config.process_names {
            let step = format!("processes.terminate.{}", name);
            results.push(contained(step, self.terminate_named(name)).await);
        }
        results
    }

    async fn terminate_named(&self, name: &str) -> StepResult {
        let step = format!("processes.terminate.{}", name);
        let processes = &self.capabilities.processes;

        let pids = match processes.find(name).await {
            Ok(pids) => pids,
            Err(e) => return StepResult::failed(step, format!("lookup failed: {}", e)),
        };
        if pids.is_empty() {
            return StepResult::failed(step, "no running processes");
        }

        let mut errors = Vec::new();
        for pid in &pids {
            match processes
                .terminate(*pid, self.config.process_exit_timeout())
                .await
            {
                Ok(()) => self
                    .audit
                    .info(&format!("Terminated process {} (PID {})", name, pid)),
                Err(e) => errors.push(format!("PID {}: {}", pid, e)),
            }
        }

        if errors.is_empty() {
            StepResult::ok(step, format!("terminated {} process(es)", pids.len()))
        } else {
            StepResult::failed(step, errors.join("; "))
        }
    }

    async fn recover_network(&self) -> Vec<StepResult> {
        let network = &self.capabilities.network;
        let mut results = Vec::new();

        const FLUSH: &str = "network.flush_dns";
        results.push(
            contained(FLUSH, async {
                match network.flush_dns(self.config.command_timeout()).await {
                    Ok(()) => StepResult::ok(FLUSH, "DNS cache flushed"),
                    Err(e) => StepResult::failed(FLUSH, e.to_string()),
                }
            })
            .await,
        );

        const RESTART: &str = "network.restart_dns_service";
        let service = &self.config.dns_service_name;
        results.push(
            contained(RESTART, async {
                match network
                    .restart_dns_service(service, self.config.service_state_timeout())
                    .await
                {
                    Ok(()) => StepResult::ok(RESTART, format!("{} restarted", service)),
                    Err(e) => StepResult::failed(RESTART, e.to_string()),
                }
            })
            .await,
        );

        const ADAPTERS: &str = "network.reset_adapters";
        let listed = AssertUnwindSafe(network.connected_adapters())
            .catch_unwind()
            .await;
        match listed {
            Ok(Ok(adapters)) if adapters.is_empty() => {
                results.push(StepResult::ok(ADAPTERS, "no connected adapters"));
            }
            Ok(Ok(adapters)) => {
                for adapter in adapters {
                    let step = format!("network.reset_adapter.{}", adapter);
                    results.push(contained(step, self.reset_adapter(&adapter)).await);
                }
            }
            Ok(Err(e)) => results.push(StepResult::failed(ADAPTERS, e.to_string())),
            Err(panic) => results.push(panicked(ADAPTERS, panic)),
        }

        results
    }

    async fn reset_adapter(&self, adapter: &str) -> StepResult {
        let step = format!("network.reset_adapter.{}", adapter);
        let network = &self.capabilities.network;

        if let Err(e) = network.set_adapter_enabled(adapter, false).await {
            return StepResult::failed(step, format!("disable failed: {}", e));
        }
        tokio::time::sleep(self.config.adapter_settle()).await;
        if let Err(e) = network.set_adapter_enabled(adapter, true).await {
            return StepResult::failed(step, format!("enable failed: {}", e));
        }
        StepResult::ok(step, "adapter reset")
    }

    async fn schedule_recovery(&self) -> Vec<StepResult> {
        vec![contained("recovery.schedule", self.register_recovery()).await]
    }

    async fn register_recovery(&self) -> StepResult {
        const STEP: &str = "recovery.schedule";
        let base = self.scheduler.base_seconds();
        match self.scheduler.schedule_auto_recovery(base).await {
            Ok(schedule) => StepResult::ok(
                STEP,
                format!(
                    "{} fires in {}s at {}",
                    schedule.task_name,
                    schedule.delay_seconds,
                    schedule.trigger_time.format("%Y-%m-%d %H:%M:%S")
                ),
            ),
            Err(e) => StepResult::failed(STEP, e.to_string()),
        }
    }
}

/// Await one sub-action, turning a panic into a failed result for `step`
async fn contained<F>(step: impl Into<String>, action: F) -> StepResult
where
    F: Future<Output = StepResult>,
{
    let step = step.into();
    match AssertUnwindSafe(action).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => panicked(&step, panic),
    }
}

fn panicked(step: &str, panic: Box<dyn Any + Send>) -> StepResult {
    let detail = format!("panicked: {}", panic_message(&*panic));
    error!("{} {}", step, detail);
    StepResult::failed(step, detail)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSystem;
    use unwarp_core::{MemoryAuditSink, MemoryStore, Severity, ServiceResponse};

    fn orchestrator(fake: FakeSystem) -> (Orchestrator, Arc<FakeSystem>, Arc<MemoryAuditSink>) {
        let fake = Arc::new(fake);
        let audit = Arc::new(MemoryAuditSink::new());
        let config = DaemonConfig {
            adapter_settle_ms: 0,
            ..DaemonConfig::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            fake.capabilities(),
            Arc::new(MemoryStore::new()),
            audit.clone(),
        );
        (orchestrator, fake, audit)
    }

    #[tokio::test]
    async fn test_healthy_host_runs_every_step_in_order() {
        let (orchestrator, fake, audit) = orchestrator(FakeSystem::healthy());
        let outcome = orchestrator.perform_emergency_disconnect().await;

        assert!(outcome.overall);
        assert_eq!(outcome.failures().count(), 0);
        assert!(audit.matching("StepFailure").is_empty());

        let journal = fake.journal();
        assert_eq!(journal.first().map(String::as_str), Some("cli disconnect"));
        assert!(journal.last().unwrap().starts_with("register unwarp-recovery-"));
        let down = journal.iter().position(|e| e == "adapter eth0 down").unwrap();
        let up = journal.iter().position(|e| e == "adapter eth0 up").unwrap();
        assert!(down < up);
    }

    #[tokio::test]
    async fn test_every_step_failing_still_reports_success() {
        let (orchestrator, fake, audit) = orchestrator(FakeSystem::broken());
        let outcome = orchestrator.perform_emergency_disconnect().await;

        // Optimistic reporting: the pipeline ran, so the client hears SUCCESS
        assert!(outcome.overall);
        assert_eq!(outcome.response(), ServiceResponse::Success);
        assert!(outcome.steps.iter().all(|s| !s.succeeded));
        assert_eq!(audit.matching("StepFailure").len(), outcome.steps.len());

        // Scheduling is still attempted after everything else failed
        assert!(fake.journal().last().unwrap().starts_with("register "));
    }

    #[tokio::test]
    async fn test_single_adapter_failure_is_one_step_failure() {
        let mut fake = FakeSystem::healthy();
        fake.adapters = Some(vec!["eth0".to_string(), "wlan0".to_string()]);
        fake.failing_adapter = Some("wlan0".to_string());
        let (orchestrator, _fake, audit) = orchestrator(fake);

        let outcome = orchestrator.perform_emergency_disconnect().await;
        assert!(outcome.overall);

        let failures: Vec<_> = outcome.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, "network.reset_adapter.wlan0");
        assert!(outcome.step("network.reset_adapter.eth0").unwrap().succeeded);

        let entries = audit.matching("StepFailure");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Warning);
        assert!(entries[0].message.contains("network.reset_adapter.wlan0"));
    }

    #[tokio::test]
    async fn test_missing_processes_are_soft_failures() {
        let mut fake = FakeSystem::healthy();
        fake.processes.remove("warp-taskbar");
        fake.stubborn_pids.insert(4242);
        let (orchestrator, _fake, _audit) = orchestrator(fake);

        let outcome = orchestrator.perform_emergency_disconnect().await;
        assert!(outcome.overall);
        assert!(!outcome.step("processes.terminate.warp-taskbar").unwrap().succeeded);
        assert!(!outcome.step("processes.terminate.warp-svc").unwrap().succeeded);
        assert!(outcome.step("processes.terminate.CloudflareWARP").unwrap().succeeded);
    }

    #[tokio::test]
    async fn test_missing_cli_is_soft_failure() {
        let mut fake = FakeSystem::healthy();
        fake.cli_outcome = None;
        let (orchestrator, _fake, _audit) = orchestrator(fake);

        let outcome = orchestrator.perform_emergency_disconnect().await;
        assert!(outcome.overall);
        assert!(!outcome.step("cli.disconnect").unwrap().succeeded);
        assert!(outcome.step("recovery.schedule").unwrap().succeeded);
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_one_step_failure() {
        let mut fake = FakeSystem::healthy();
        fake.panic_on_adapter = Some("eth0".to_string());
        let (orchestrator, fake, audit) = orchestrator(fake);

        let outcome = orchestrator.perform_emergency_disconnect().await;
        assert!(outcome.overall);
        assert_eq!(outcome.response(), ServiceResponse::Success);

        assert!(outcome.step("network.flush_dns").unwrap().succeeded);
        assert!(outcome.step("network.restart_dns_service").unwrap().succeeded);
        let reset = outcome.step("network.reset_adapter.eth0").unwrap();
        assert!(!reset.succeeded);
        assert!(reset.detail.contains("adapter object threw"));
        assert!(outcome.step("recovery.schedule").unwrap().succeeded);
        assert_eq!(fake.registered().len(), 1);

        let entries = audit.matching("StepFailure");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Warning);
        assert!(entries[0]
            .message
            .starts_with("StepFailure [network.reset_adapter.eth0]"));
    }

    #[tokio::test]
    async fn test_panicking_flush_leaves_later_sub_actions_running() {
        let mut fake = FakeSystem::healthy();
        fake.panic_on_flush = true;
        let (orchestrator, fake, _audit) = orchestrator(fake);

        let outcome = orchestrator.perform_emergency_disconnect().await;
        assert!(outcome.overall);
        assert_eq!(outcome.failures().count(), 1);
        assert!(outcome
            .step("network.flush_dns")
            .unwrap()
            .detail
            .contains("resolver handle vanished"));
        assert!(outcome.step("network.restart_dns_service").unwrap().succeeded);
        assert!(outcome.step("network.reset_adapter.eth0").unwrap().succeeded);
        assert!(fake.journal().iter().any(|e| e == "adapter eth0 up"));
    }

    #[tokio::test]
    async fn test_no_connected_adapters_is_not_a_failure() {
        let mut fake = FakeSystem::healthy();
        fake.adapters = Some(Vec::new());
        let (orchestrator, _fake, _audit) = orchestrator(fake);

        let outcome = orchestrator.perform_emergency_disconnect().await;
        assert!(outcome.step("network.reset_adapters").unwrap().succeeded);
        assert_eq!(outcome.failures().count(), 0);
    }
}
