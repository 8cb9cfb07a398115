//! Rate limiting for authentication attempts
//!
//! - Each failure imposes a backoff of 5 seconds per failure so far
//! - The third failure inside the window locks the operator out for 60 seconds
//! - A quiet gap longer than the window forgives earlier failures

use std::fmt;

use unwarp_core::AuthState;

/// Failures allowed before a lockout
pub const MAX_ATTEMPTS: u32 = 3;

/// Lockout length, and the quiet gap after which failures are forgiven
pub const LOCKOUT_WINDOW_SECS: i64 = 60;

/// Backoff per recorded failure
pub const BACKOFF_UNIT_SECS: i64 = 5;

/// Why an attempt was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// A lockout is still running
    LockedOut,
    /// This check hit the attempt limit and started a lockout
    MaxAttemptsExceeded,
    /// Too soon after the last failure
    Backoff,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::LockedOut => f.write_str("Too many failed authentication attempts"),
            DenyReason::MaxAttemptsExceeded => {
                f.write_str("Maximum authentication attempts exceeded")
            }
            DenyReason::Backoff => f.write_str("Authentication attempted too soon"),
        }
    }
}

/// Verdict of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Deny {
        reason: DenyReason,
        wait_seconds: u64,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow)
    }
}

/// Result of evaluating the policy against a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: RateLimitDecision,
    /// New record to persist, when the check itself changed it
    pub updated: Option<AuthState>,
}

/// Apply the policy to `state` at `now` (Unix seconds)
///
/// Order matters: an active lockout wins, then stale failures are forgiven,
/// then the attempt limit, then the per-failure backoff.
pub fn evaluate(state: AuthState, now: i64) -> Evaluation {
    if state.is_locked_out(now) {
        return Evaluation {
            decision: RateLimitDecision::Deny {
                reason: DenyReason::LockedOut,
                wait_seconds: state.lockout_remaining(now),
            },
            updated: None,
        };
    }

    let mut next = state;
    if now > state.last_attempt_time + LOCKOUT_WINDOW_SECS {
        next.failed_attempts = 0;
    }

    if next.failed_attempts >= MAX_ATTEMPTS {
        next.lockout_end_time = now + LOCKOUT_WINDOW_SECS;
        return Evaluation {
            decision: RateLimitDecision::Deny {
                reason: DenyReason::MaxAttemptsExceeded,
                wait_seconds: LOCKOUT_WINDOW_SECS as u64,
            },
            updated: Some(next),
        };
    }

    let updated = (next != state).then_some(next);

    if next.failed_attempts > 0 {
        let backoff = BACKOFF_UNIT_SECS * i64::from(next.failed_attempts);
        let elapsed = now - next.last_attempt_time;
        if elapsed < backoff {
            return Evaluation {
                decision: RateLimitDecision::Deny {
                    reason: DenyReason::Backoff,
                    wait_seconds: (backoff - elapsed) as u64,
                },
                updated,
            };
        }
    }

    Evaluation {
        decision: RateLimitDecision::Allow,
        updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(count: u32, last: i64) -> AuthState {
        AuthState {
            failed_attempts: count,
            last_attempt_time: last,
            lockout_end_time: 0,
        }
    }

    #[test]
    fn test_fresh_state_is_allowed() {
        let eval = evaluate(AuthState::default(), 1_000);
        assert_eq!(eval.decision, RateLimitDecision::Allow);
        assert!(eval.updated.is_none());
    }

    #[test]
    fn test_backoff_is_five_seconds_per_failure() {
        for n in 1..MAX_ATTEMPTS {
            let state = failed(n, 1_000);
            let backoff = 5 * i64::from(n);
            assert_eq!(
                evaluate(state, 1_000 + backoff - 1).decision,
                RateLimitDecision::Deny {
                    reason: DenyReason::Backoff,
                    wait_seconds: 1
                }
            );
            assert!(evaluate(state, 1_000 + backoff).decision.is_allowed());
        }
    }

    #[test]
    fn test_third_failure_starts_lockout() {
        let eval = evaluate(failed(3, 1_000), 1_020);
        assert_eq!(
            eval.decision,
            RateLimitDecision::Deny {
                reason: DenyReason::MaxAttemptsExceeded,
                wait_seconds: 60
            }
        );
        assert_eq!(eval.updated.unwrap().lockout_end_time, 1_080);
    }

    #[test]
    fn test_active_lockout_reports_remaining() {
        let state = AuthState {
            failed_attempts: 3,
            last_attempt_time: 1_000,
            lockout_end_time: 1_080,
        };
        assert_eq!(
            evaluate(state, 1_050).decision,
            RateLimitDecision::Deny {
                reason: DenyReason::LockedOut,
                wait_seconds: 30
            }
        );
    }

    #[test]
    fn test_stale_failures_are_forgiven() {
        let eval = evaluate(failed(2, 1_000), 1_061);
        assert!(eval.decision.is_allowed());
        assert_eq!(eval.updated.unwrap().failed_attempts, 0);

        // Exactly at the window edge nothing is forgiven
        let edge = evaluate(failed(2, 1_000), 1_060);
        assert!(edge.decision.is_allowed());
        assert!(edge.updated.is_none());
    }

    #[test]
    fn test_stale_failures_forgiven_even_at_limit() {
        let eval = evaluate(failed(3, 1_000), 1_061);
        assert!(eval.decision.is_allowed());
        assert_eq!(eval.updated.unwrap().failed_attempts, 0);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        const START: i64 = 1_700_000_000;

        proptest! {
            #[test]
            fn backoff_wait_is_five_seconds_per_failure(
                n in 1..MAX_ATTEMPTS,
                elapsed in 0i64..LOCKOUT_WINDOW_SECS,
            ) {
                let eval = evaluate(failed(n, START), START + elapsed);
                let backoff = BACKOFF_UNIT_SECS * i64::from(n);
                if elapsed < backoff {
                    prop_assert_eq!(
                        eval.decision,
                        RateLimitDecision::Deny {
                            reason: DenyReason::Backoff,
                            wait_seconds: (backoff - elapsed) as u64,
                        }
                    );
                } else {
                    prop_assert!(eval.decision.is_allowed());
                }
                prop_assert!(eval.updated.is_none());
            }

            #[test]
            fn quiet_gap_past_window_forgives(
                n in 0u32..20,
                gap in (LOCKOUT_WINDOW_SECS + 1)..100_000i64,
            ) {
                let eval = evaluate(failed(n, START), START + gap);
                prop_assert!(eval.decision.is_allowed());
                let reset = eval.updated.map(|s| s.failed_attempts).unwrap_or(n);
                prop_assert_eq!(reset, 0);
            }

            #[test]
            fn active_lockout_always_waits(
                remaining in 1i64..=LOCKOUT_WINDOW_SECS,
                n in 0u32..20,
            ) {
                let state = AuthState {
                    failed_attempts: n,
                    last_attempt_time: START,
                    lockout_end_time: START + LOCKOUT_WINDOW_SECS,
                };
                let now = state.lockout_end_time - remaining;
                match evaluate(state, now).decision {
                    RateLimitDecision::Deny { reason, wait_seconds } => {
                        prop_assert_eq!(reason, DenyReason::LockedOut);
                        prop_assert!(wait_seconds > 0);
                        prop_assert!(wait_seconds <= LOCKOUT_WINDOW_SECS as u64);
                    }
                    RateLimitDecision::Allow => prop_assert!(false, "lockout let an attempt through"),
                }
            }

            #[test]
            fn limit_inside_window_locks_for_full_window(
                n in MAX_ATTEMPTS..20,
                elapsed in 0i64..=LOCKOUT_WINDOW_SECS,
            ) {
                let now = START + elapsed;
                let eval = evaluate(failed(n, START), now);
                prop_assert_eq!(
                    eval.decision,
                    RateLimitDecision::Deny {
                        reason: DenyReason::MaxAttemptsExceeded,
                        wait_seconds: LOCKOUT_WINDOW_SECS as u64,
                    }
                );
                prop_assert_eq!(
                    eval.updated.map(|s| s.lockout_end_time),
                    Some(now + LOCKOUT_WINDOW_SECS)
                );
            }
        }
    }
}
