//! Core protocol and state types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::store::KeyValueStore;

/// Request sent by the client over the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    /// Run the emergency disconnect pipeline
    Disconnect,
    /// Liveness check
    Status,
}

impl ServiceCommand {
    /// Wire representation (without the line terminator)
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCommand::Disconnect => "DISCONNECT",
            ServiceCommand::Status => "STATUS",
        }
    }
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceCommand {
    type Err = CoreError;

    /// Parses one request line. Only the trailing line terminator is
    /// stripped; the match is otherwise exact and case-sensitive.
    fn from_str(line: &str) -> Result<Self> {
        match trim_line_ending(line) {
            "DISCONNECT" => Ok(ServiceCommand::Disconnect),
            "STATUS" => Ok(ServiceCommand::Status),
            other => Err(CoreError::UnknownCommand(other.to_string())),
        }
    }
}

/// Response written by the service for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceResponse {
    Success,
    Failed,
    Ready,
    InvalidCommand,
}

impl ServiceResponse {
    /// Wire representation (without the line terminator)
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceResponse::Success => "SUCCESS",
            ServiceResponse::Failed => "FAILED",
            ServiceResponse::Ready => "READY",
            ServiceResponse::InvalidCommand => "INVALID_COMMAND",
        }
    }
}

impl fmt::Display for ServiceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceResponse {
    type Err = CoreError;

    fn from_str(line: &str) -> Result<Self> {
        match trim_line_ending(line) {
            "SUCCESS" => Ok(ServiceResponse::Success),
            "FAILED" => Ok(ServiceResponse::Failed),
            "READY" => Ok(ServiceResponse::Ready),
            "INVALID_COMMAND" => Ok(ServiceResponse::InvalidCommand),
            other => Err(CoreError::UnknownResponse(other.to_string())),
        }
    }
}

fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Per-operator authentication bookkeeping
///
/// Timestamps are Unix seconds; zero means "never" / "no lockout".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub failed_attempts: u32,
    pub last_attempt_time: i64,
    pub lockout_end_time: i64,
}

impl AuthState {
    pub const FAILED_ATTEMPTS_KEY: &'static str = "failedAttempts";
    pub const LAST_ATTEMPT_KEY: &'static str = "lastAttemptTime";
    pub const LOCKOUT_END_KEY: &'static str = "lockoutEndTime";

    /// Whether a lockout is still running at `now`
    pub fn is_locked_out(&self, now: i64) -> bool {
        now < self.lockout_end_time
    }

    /// Seconds left on the current lockout (zero if none)
    pub fn lockout_remaining(&self, now: i64) -> u64 {
        (self.lockout_end_time - now).max(0) as u64
    }

    /// Apply a failed attempt at `now`
    pub fn record_failure(&mut self, now: i64) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_attempt_time = now;
    }

    /// Apply a successful authentication
    pub fn record_success(&mut self) {
        *self = AuthState::default();
    }

    /// Load the record for `operator`; missing keys read as zero
    pub fn load(store: &dyn KeyValueStore, operator: &str) -> Result<Self> {
        Ok(Self {
            failed_attempts: read_int(store, &scoped_key(operator, Self::FAILED_ATTEMPTS_KEY))?
                .unwrap_or(0),
            last_attempt_time: read_int(store, &scoped_key(operator, Self::LAST_ATTEMPT_KEY))?
                .unwrap_or(0),
            lockout_end_time: read_int(store, &scoped_key(operator, Self::LOCKOUT_END_KEY))?
                .unwrap_or(0),
        })
    }

    /// Persist all three fields for `operator`
    pub fn save(&self, store: &dyn KeyValueStore, operator: &str) -> Result<()> {
        store.set_many(&[
            (
                scoped_key(operator, Self::FAILED_ATTEMPTS_KEY),
                self.failed_attempts.to_string(),
            ),
            (
                scoped_key(operator, Self::LAST_ATTEMPT_KEY),
                self.last_attempt_time.to_string(),
            ),
            (
                scoped_key(operator, Self::LOCKOUT_END_KEY),
                self.lockout_end_time.to_string(),
            ),
        ])
    }
}

/// Build the per-operator key for `field`
pub fn scoped_key(operator: &str, field: &str) -> String {
    format!("{}.{}", operator, field)
}

fn read_int<T: FromStr>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CoreError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

/// Result of a single orchestration step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Dotted step identifier, e.g. `network.flush_dns`
    pub step: String,
    pub succeeded: bool,
    pub detail: String,
}

impl StepResult {
    pub fn ok(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            succeeded: true,
            detail: detail.into(),
        }
    }

    pub fn failed(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            succeeded: false,
            detail: detail.into(),
        }
    }

    /// Audit line used when the step failed
    pub fn failure_message(&self) -> String {
        format!("StepFailure [{}]: {}", self.step, self.detail)
    }
}

/// Outcome of one emergency disconnect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectOutcome {
    pub steps: Vec<StepResult>,
    /// True unless the pipeline itself could not run to completion
    pub overall: bool,
}

impl DisconnectOutcome {
    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.succeeded)
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step == name)
    }

    /// Response the channel sends for this outcome
    pub fn response(&self) -> ServiceResponse {
        if self.overall {
            ServiceResponse::Success
        } else {
            ServiceResponse::Failed
        }
    }
}

/// A computed auto-recovery trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySchedule {
    pub task_name: String,
    pub trigger_time: DateTime<Local>,
    pub base_seconds: u32,
    /// Always within `[base_seconds, 2 * base_seconds)`
    pub delay_seconds: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_command_parsing() {
        assert_eq!("STATUS\n".parse::<ServiceCommand>().unwrap(), ServiceCommand::Status);
        assert_eq!(
            "DISCONNECT\r\n".parse::<ServiceCommand>().unwrap(),
            ServiceCommand::Disconnect
        );
        assert!("status\n".parse::<ServiceCommand>().is_err());
        assert!(" STATUS\n".parse::<ServiceCommand>().is_err());
        assert!("".parse::<ServiceCommand>().is_err());
    }

    #[test]
    fn test_response_wire_forms() {
        assert_eq!(ServiceResponse::InvalidCommand.to_string(), "INVALID_COMMAND");
        assert_eq!("READY\n".parse::<ServiceResponse>().unwrap(), ServiceResponse::Ready);
        assert!("OK\n".parse::<ServiceResponse>().is_err());
    }

    #[test]
    fn test_auth_state_transitions() {
        let mut state = AuthState::default();
        state.record_failure(100);
        state.record_failure(110);
        assert_eq!(state.failed_attempts, 2);
        assert_eq!(state.last_attempt_time, 110);

        state.lockout_end_time = 200;
        assert!(state.is_locked_out(150));
        assert_eq!(state.lockout_remaining(150), 50);
        assert!(!state.is_locked_out(200));

        state.record_success();
        assert_eq!(state, AuthState::default());
    }

    #[test]
    fn test_auth_state_persistence_is_per_operator() {
        let store = MemoryStore::new();
        let state = AuthState {
            failed_attempts: 2,
            last_attempt_time: 1_700_000_000,
            lockout_end_time: 0,
        };
        state.save(&store, "alice").unwrap();

        assert_eq!(AuthState::load(&store, "alice").unwrap(), state);
        assert_eq!(AuthState::load(&store, "bob").unwrap(), AuthState::default());
    }

    #[test]
    fn test_auth_state_rejects_garbage() {
        let store = MemoryStore::new();
        store.set("alice.failedAttempts", "many").unwrap();
        assert!(matches!(
            AuthState::load(&store, "alice"),
            Err(CoreError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_outcome_response_mapping() {
        let mut outcome = DisconnectOutcome {
            steps: vec![StepResult::failed("cli.disconnect", "exit code 1")],
            overall: true,
        };
        assert_eq!(outcome.response(), ServiceResponse::Success);
        assert_eq!(outcome.failures().count(), 1);

        outcome.overall = false;
        assert_eq!(outcome.response(), ServiceResponse::Failed);
    }
}
