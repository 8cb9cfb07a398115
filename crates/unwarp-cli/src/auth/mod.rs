//! Authentication gate for the break-glass client
//!
//! Every disconnect request passes through here first.
//!
//! # Flow
//!
//! - `check_rate_limit` refuses operators inside a backoff or lockout
//! - `authenticate` tries biometrics, falling back to the break-glass
//!   password when no biometric device can be used
//! - `record_attempt` persists the result; a canceled prompt is audited
//!   but never counted as a failure
//!
//! The rate-limit record lives in an injected key/value store under the
//! operator's name. Store errors never lock an operator out.

mod lockout;
mod verifier;

pub use lockout::{
    evaluate, DenyReason, Evaluation, RateLimitDecision, BACKOFF_UNIT_SECS, LOCKOUT_WINDOW_SECS,
    MAX_ATTEMPTS,
};
pub use verifier::{
    check_password, classify_biometric_output, hash_password, BiometricVerifier,
    CredentialVerifier, PasswordVerifier, PromptResult, SecretPrompt, TerminalPrompt,
    VerifierKind, VerifyResult,
};

use std::sync::Arc;
use tracing::{debug, info, warn};

use unwarp_core::{AuditSink, AuthState, KeyValueStore};

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Password must not be empty")]
    EmptyPassword,
}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        AuthError::Storage(e.to_string())
    }
}

/// Result of one authentication attempt, as recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
    Canceled,
}

/// What the gate decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Denied,
    Canceled,
}

impl AuthOutcome {
    pub fn attempt(self) -> AttemptOutcome {
        match self {
            AuthOutcome::Authenticated => AttemptOutcome::Success,
            AuthOutcome::Denied => AttemptOutcome::Failure,
            AuthOutcome::Canceled => AttemptOutcome::Canceled,
        }
    }
}

/// Source of the current time in Unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Rate limiter plus credential verification
pub struct AuthGate {
    store: Arc<dyn KeyValueStore>,
    biometric: Arc<dyn CredentialVerifier>,
    password: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl AuthGate {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        biometric: Arc<dyn CredentialVerifier>,
        password: Arc<dyn CredentialVerifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            biometric,
            password,
            clock: Arc::new(SystemClock),
            audit,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn load(&self, operator: &str) -> Option<AuthState> {
        match AuthState::load(self.store.as_ref(), operator) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Cannot read authentication state for {}: {}", operator, e);
                None
            }
        }
    }

    fn save(&self, state: &AuthState, operator: &str) {
        if let Err(e) = state.save(self.store.as_ref(), operator) {
            warn!("Cannot persist authentication state for {}: {}", operator, e);
        }
    }

    /// Decide whether `operator` may attempt authentication now
    pub fn check_rate_limit(&self, operator: &str) -> RateLimitDecision {
        let Some(state) = self.load(operator) else {
            return RateLimitDecision::Allow;
        };

        let evaluation = evaluate(state, self.clock.now());
        if let Some(updated) = evaluation.updated {
            self.save(&updated, operator);
        }

        if let RateLimitDecision::Deny {
            reason,
            wait_seconds,
        } = evaluation.decision
        {
            self.audit.warning(&format!(
                "Rate limit denied {}: {} ({}s remaining)",
                operator, reason, wait_seconds
            ));
        }
        evaluation.decision
    }

    /// Persist the result of one authentication attempt
    pub fn record_attempt(&self, operator: &str, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Canceled => {
                self.audit
                    .info(&format!("Authentication canceled by {}", operator));
                return;
            }
            AttemptOutcome::Success => {
                self.audit
                    .info(&format!("Authentication succeeded for {}", operator));
            }
            AttemptOutcome::Failure => {
                self.audit
                    .warning(&format!("Authentication failed for {}", operator));
            }
        }

        // An unreadable record starts over rather than blocking the write
        let mut state = self.load(operator).unwrap_or_default();
        match outcome {
            AttemptOutcome::Success => state.record_success(),
            AttemptOutcome::Failure => state.record_failure(self.clock.now()),
            AttemptOutcome::Canceled => {}
        }
        self.save(&state, operator);
    }

    /// Failures left before a lockout
    pub fn remaining_attempts(&self, operator: &str) -> u32 {
        let failed = self
            .load(operator)
            .map(|state| state.failed_attempts)
            .unwrap_or(0);
        MAX_ATTEMPTS.saturating_sub(failed)
    }

    /// Verify the operator, biometrics first
    pub async fn authenticate(&self, reason: &str) -> AuthOutcome {
        match self.biometric.verify(reason).await {
            VerifyResult::Verified => {
                info!("Biometric verification succeeded");
                return AuthOutcome::Authenticated;
            }
            VerifyResult::Canceled => {
                info!("Biometric verification canceled");
                return AuthOutcome::Canceled;
            }
            VerifyResult::Rejected => {
                info!("Biometric verification rejected");
                return AuthOutcome::Denied;
            }
            VerifyResult::Unavailable(why) => {
                debug!("Biometrics unavailable ({}), using password", why);
            }
            VerifyResult::Error(e) => {
                warn!("Biometric verification error ({}), using password", e);
            }
        }

        match self.password.verify(reason).await {
            VerifyResult::Verified => AuthOutcome::Authenticated,
            VerifyResult::Canceled => AuthOutcome::Canceled,
            VerifyResult::Rejected => AuthOutcome::Denied,
            VerifyResult::Unavailable(why) => {
                warn!("Password verification unavailable: {}", why);
                AuthOutcome::Denied
            }
            VerifyResult::Error(e) => {
                warn!("Password verification error: {}", e);
                AuthOutcome::Denied
            }
        }
    }
}
