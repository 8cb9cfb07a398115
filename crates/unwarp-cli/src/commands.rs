//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use zeroize::Zeroizing;

use unwarp_core::{
    validate_reconnect_base, write_reconnect_base, AuditSink, KeyValueStore,
    DEFAULT_RECONNECT_BASE_SECS,
};
use unwarp_daemon::DaemonConfig;

use crate::auth::{
    hash_password, AuthError, AuthGate, AuthOutcome, DenyReason, PromptResult,
    RateLimitDecision, SecretPrompt,
};
use crate::client::{ClientError, Result, UnwarpClient};
use crate::policy::PermissionStatus;

const FEATURES: &str = "\
Features:
  - Biometric verification, falling back to a break-glass password
  - Rate limiting: 3 attempts, then a 60 second lockout
  - Administrator and console session required
  - Disconnects Cloudflare WARP, terminates its processes and resets networking
  - Schedules automatic reconnection after a randomized delay

Without --liveincident the tool runs in test mode and changes nothing.";

/// Unwarp - break-glass Cloudflare WARP disconnect
#[derive(Parser, Debug)]
#[command(name = "unwarp")]
#[command(about = "Emergency disconnect for Cloudflare WARP", long_about = None)]
#[command(version)]
#[command(after_help = FEATURES)]
pub struct Cli {
    /// Execute the disconnect (default is test mode)
    #[arg(long)]
    pub liveincident: bool,

    /// Base delay before automatic reconnection, 60 to 43200 seconds
    #[arg(long, value_name = "SECONDS", value_parser = parse_reconnect)]
    pub reconnect: Option<u32>,

    /// Path to the service socket or pipe name
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Set the break-glass password, then exit
    #[arg(long, conflicts_with_all = ["liveincident", "reconnect"])]
    pub enroll_password: bool,
}

fn parse_reconnect(raw: &str) -> std::result::Result<u32, String> {
    let seconds: i64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{:?} is not a number of seconds", raw))?;
    validate_reconnect_base(seconds).map_err(|e| e.to_string())
}

impl Cli {
    /// Reconnect base to persist; the default when none was given
    pub fn reconnect_base(&self) -> u32 {
        self.reconnect.unwrap_or(DEFAULT_RECONNECT_BASE_SECS)
    }
}

/// Everything one invocation needs, injected so the flow can be driven
/// without a terminal or a real service
pub struct Session {
    pub operator: String,
    pub permissions: PermissionStatus,
    pub gate: AuthGate,
    pub settings: Arc<dyn KeyValueStore>,
    pub client: UnwarpClient,
    pub config: DaemonConfig,
    pub audit: Arc<dyn AuditSink>,
}

impl Session {
    /// Refuse non-administrators and remote sessions
    pub fn enforce_policy(&self) -> Result<()> {
        if !self.permissions.is_administrator {
            self.audit.warning(&format!(
                "Access denied: {} is not an administrator",
                self.operator
            ));
            return Err(ClientError::PolicyDenied(
                "administrator privileges are required".to_string(),
            ));
        }
        if !self.permissions.is_console {
            self.audit.warning("Access denied: Remote session attempted");
            return Err(ClientError::PolicyDenied(
                "must be run from the console session".to_string(),
            ));
        }
        Ok(())
    }

    /// Rate limit, verify, and record the attempt
    pub async fn authenticate(&self, purpose: &str) -> Result<()> {
        if let RateLimitDecision::Deny {
            reason,
            wait_seconds,
        } = self.gate.check_rate_limit(&self.operator)
        {
            match reason {
                DenyReason::MaxAttemptsExceeded => eprintln!(
                    "Maximum authentication attempts exceeded. Account locked for {} seconds.",
                    wait_seconds
                ),
                _ => eprintln!("Please wait {} seconds before next attempt.", wait_seconds),
            }
            return Err(ClientError::RateLimited {
                reason,
                wait_seconds,
            });
        }

        let outcome = self.gate.authenticate(purpose).await;
        self.gate.record_attempt(&self.operator, outcome.attempt());

        match outcome {
            AuthOutcome::Authenticated => Ok(()),
            AuthOutcome::Canceled => Err(ClientError::AuthenticationCanceled),
            AuthOutcome::Denied => {
                eprintln!(
                    "Authentication failed. {} attempt(s) remaining.",
                    self.gate.remaining_attempts(&self.operator)
                );
                Err(ClientError::AuthenticationFailed)
            }
        }
    }

    fn persist_reconnect_base(&self, seconds: u32) {
        match write_reconnect_base(self.settings.as_ref(), seconds) {
            Ok(()) => info!("Reconnect base set to {} seconds", seconds),
            Err(e) => warn!("Could not save reconnect base: {}", e),
        }
    }

    /// Actions the service performs on `DISCONNECT`
    pub fn planned_actions(&self, base: u32) -> Vec<String> {
        vec![
            format!("{} disconnect", self.config.warp_cli_path.display()),
            format!("Terminate processes: {}", self.config.process_names.join(", ")),
            "Flush the DNS cache".to_string(),
            format!("Restart the {} service", self.config.dns_service_name),
            "Disable and re-enable each connected network adapter".to_string(),
            format!(
                "Schedule auto-recovery in {} to {} seconds",
                base,
                u64::from(base) * 2
            ),
        ]
    }

    async fn test_mode_report(&self, cli: &Cli) {
        println!();
        println!("Permission status:");
        println!("{}", self.permissions);
        println!();

        let running = self.client.is_running().await;
        println!(
            "Service status: {}",
            if running { "Running" } else { "Not responding" }
        );
        println!();

        println!("Commands that would be executed:");
        for action in self.planned_actions(cli.reconnect_base()) {
            println!("  - {}", action);
        }

        if cli.reconnect_base() != DEFAULT_RECONNECT_BASE_SECS {
            println!();
            println!(
                "Custom reconnect base: {} seconds (default {})",
                cli.reconnect_base(),
                DEFAULT_RECONNECT_BASE_SECS
            );
        }
    }

    /// The break-glass flow
    pub async fn run(&self, cli: &Cli) -> Result<()> {
        if cli.liveincident {
            println!("=== UNWARP: LIVE INCIDENT MODE ===");
        } else {
            println!("=== UNWARP: TEST MODE ===");
        }

        self.enforce_policy()?;
        self.authenticate("Unwarp emergency disconnect").await?;

        if !cli.liveincident {
            self.test_mode_report(cli).await;
            self.persist_reconnect_base(cli.reconnect_base());
            self.audit.info("Test mode completed");
            println!();
            println!("Test mode completed. No actual commands were executed.");
            println!("To execute in a live incident, run with: --liveincident");
            return Ok(());
        }

        self.persist_reconnect_base(cli.reconnect_base());
        self.audit.info(&format!(
            "Live disconnect requested by {}",
            self.operator
        ));

        println!("[*] Connecting to unwarp service...");
        self.client.disconnect().await?;

        println!("[+] Emergency disconnect completed.");
        println!(
            "[+] WARP will reconnect automatically in {} to {} seconds.",
            cli.reconnect_base(),
            u64::from(cli.reconnect_base()) * 2
        );
        Ok(())
    }

    /// Replace the break-glass password
    ///
    /// The first enrollment needs only policy checks; replacing an existing
    /// password requires authenticating first.
    pub async fn enroll_password(
        &self,
        credential_path: &Path,
        prompt: &dyn SecretPrompt,
    ) -> Result<()> {
        self.enforce_policy()?;
        if credential_path.exists() {
            self.authenticate("Replace break-glass password").await?;
        }

        let first = read_secret(prompt, "New break-glass password")?;
        if first.is_empty() {
            return Err(AuthError::EmptyPassword.into());
        }
        let second = read_secret(prompt, "Confirm password")?;
        if *first != *second {
            return Err(AuthError::PasswordMismatch.into());
        }

        let phc = hash_password(&first)?;
        write_credential(credential_path, &phc)?;

        self.audit.info(&format!(
            "Break-glass password enrolled by {}",
            self.operator
        ));
        println!("Break-glass password saved to {}", credential_path.display());
        Ok(())
    }
}

fn read_secret(prompt: &dyn SecretPrompt, label: &str) -> Result<Zeroizing<String>> {
    match prompt.read_secret(label) {
        PromptResult::Entered(secret) => Ok(secret),
        PromptResult::Canceled => Err(ClientError::AuthenticationCanceled),
        PromptResult::Failed(e) => Err(AuthError::Storage(e).into()),
    }
}

fn write_credential(path: &Path, phc: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", phc))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
