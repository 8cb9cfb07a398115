//! Credential verifiers: biometric helper and break-glass password
//!
//! Verifiers only report what happened. Choosing whether to fall back from
//! biometrics to the password is the gate's job.

use async_trait::async_trait;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString},
    Argon2,
};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::debug;
use zeroize::Zeroizing;

use super::AuthError;

/// What a single verification produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Verified,
    /// No device, nothing enrolled, or no credential configured
    Unavailable(String),
    /// The operator presented a credential and it did not match
    Rejected,
    /// The operator backed out
    Canceled,
    /// Anything else that went wrong
    Error(String),
}

/// Which slot a verifier fills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierKind {
    Biometric,
    Password,
}

/// One way of proving the operator's identity
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    fn kind(&self) -> VerifierKind;

    async fn verify(&self, reason: &str) -> VerifyResult;
}

// =============================================================================
// Biometric
// =============================================================================

/// Fingerprint verification through an external helper (`fprintd-verify`)
pub struct BiometricVerifier {
    program: PathBuf,
    timeout: Duration,
}

impl BiometricVerifier {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }
}

impl Default for BiometricVerifier {
    fn default() -> Self {
        Self::new(PathBuf::from("fprintd-verify"), Duration::from_secs(60))
    }
}

/// Map helper output to a result
pub fn classify_biometric_output(exit_ok: bool, output: &str) -> VerifyResult {
    let lowered = output.to_lowercase();
    if lowered.contains("no devices available")
        || lowered.contains("noenrolledprints")
        || lowered.contains("no fingers enrolled")
    {
        VerifyResult::Unavailable(output.trim().to_string())
    } else if exit_ok {
        VerifyResult::Verified
    } else {
        VerifyResult::Rejected
    }
}

#[async_trait]
impl CredentialVerifier for BiometricVerifier {
    fn kind(&self) -> VerifierKind {
        VerifierKind::Biometric
    }

    #[cfg(unix)]
    async fn verify(&self, reason: &str) -> VerifyResult {
        use unwarp_daemon::system::command::capture;
        use unwarp_daemon::{CommandOutcome, DaemonError};

        eprintln!("{}", reason);
        eprintln!("Touch the fingerprint reader...");

        match capture(&self.program, &[] as &[&str], self.timeout).await {
            Ok(captured) => match captured.outcome {
                CommandOutcome::TimedOut => {
                    VerifyResult::Error("fingerprint prompt timed out".to_string())
                }
                outcome => {
                    let output = format!("{}\n{}", captured.stdout, captured.stderr);
                    classify_biometric_output(outcome.success(), &output)
                }
            },
            Err(DaemonError::Spawn { program, reason }) => {
                debug!("Biometric helper {} unavailable: {}", program, reason);
                VerifyResult::Unavailable(format!("{} is not installed", program))
            }
            Err(e) => VerifyResult::Error(e.to_string()),
        }
    }

    #[cfg(windows)]
    async fn verify(&self, _reason: &str) -> VerifyResult {
        VerifyResult::Unavailable("Windows Hello is not supported by this build".to_string())
    }
}

// =============================================================================
// Password
// =============================================================================

/// Outcome of reading a secret from the operator
pub enum PromptResult {
    Entered(Zeroizing<String>),
    Canceled,
    Failed(String),
}

/// Source of typed secrets
pub trait SecretPrompt: Send + Sync {
    fn read_secret(&self, label: &str) -> PromptResult;
}

/// Masked prompt on the controlling terminal
///
/// Echoes `*` per character. Esc or Ctrl-C cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read_masked(label: &str) -> io::Result<Option<Zeroizing<String>>> {
        let mut stderr = io::stderr();
        write!(stderr, "{}: ", label)?;
        stderr.flush()?;

        let mut secret = Zeroizing::new(String::new());
        loop {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Enter => return Ok(Some(secret)),
                KeyCode::Esc => return Ok(None),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(None)
                }
                KeyCode::Backspace => {
                    if secret.pop().is_some() {
                        write!(stderr, "\x08 \x08")?;
                    }
                }
                KeyCode::Char(c) => {
                    secret.push(c);
                    write!(stderr, "*")?;
                }
                _ => {}
            }
            stderr.flush()?;
        }
    }
}

impl SecretPrompt for TerminalPrompt {
    fn read_secret(&self, label: &str) -> PromptResult {
        if let Err(e) = enable_raw_mode() {
            return PromptResult::Failed(format!("cannot read from terminal: {}", e));
        }
        let result = Self::read_masked(label);
        let _ = disable_raw_mode();
        eprintln!();

        match result {
            Ok(Some(secret)) => PromptResult::Entered(secret),
            Ok(None) => PromptResult::Canceled,
            Err(e) => PromptResult::Failed(e.to_string()),
        }
    }
}

/// Break-glass password checked against an Argon2id PHC hash on disk
pub struct PasswordVerifier {
    credential_path: PathBuf,
    prompt: Arc<dyn SecretPrompt>,
}

impl PasswordVerifier {
    pub fn new(credential_path: PathBuf, prompt: Arc<dyn SecretPrompt>) -> Self {
        Self {
            credential_path,
            prompt,
        }
    }

    fn stored_hash(&self) -> Result<Option<String>, String> {
        match std::fs::read_to_string(&self.credential_path) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!(
                "cannot read {}: {}",
                self.credential_path.display(),
                e
            )),
        }
    }
}

#[async_trait]
impl CredentialVerifier for PasswordVerifier {
    fn kind(&self) -> VerifierKind {
        VerifierKind::Password
    }

    async fn verify(&self, reason: &str) -> VerifyResult {
        let phc = match self.stored_hash() {
            Ok(Some(phc)) => phc,
            Ok(None) => {
                return VerifyResult::Unavailable("no break-glass password enrolled".to_string())
            }
            Err(e) => return VerifyResult::Error(e),
        };

        let prompt = Arc::clone(&self.prompt);
        let label = format!("{} - break-glass password", reason);
        let entered = match tokio::task::spawn_blocking(move || prompt.read_secret(&label)).await {
            Ok(result) => result,
            Err(e) => return VerifyResult::Error(format!("prompt task failed: {}", e)),
        };

        let secret = match entered {
            PromptResult::Entered(secret) => secret,
            PromptResult::Canceled => return VerifyResult::Canceled,
            PromptResult::Failed(e) => return VerifyResult::Error(e),
        };

        match check_password(&secret, &phc) {
            Ok(true) => VerifyResult::Verified,
            Ok(false) => VerifyResult::Rejected,
            Err(e) => VerifyResult::Error(e.to_string()),
        }
    }
}

/// Hash a new break-glass password as an Argon2id PHC string
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let bytes = Zeroizing::new(password.as_bytes().to_vec());
    Argon2::default()
        .hash_password(&bytes, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Crypto(format!("Failed to hash password: {}", e)))
}

/// Compare a password with a stored PHC string
pub fn check_password(password: &str, phc: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(phc)
        .map_err(|e| AuthError::Crypto(format!("Stored credential is malformed: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedPrompt(Mutex<Vec<PromptResult>>);

    impl ScriptedPrompt {
        fn typing(secret: &str) -> Arc<Self> {
            Arc::new(Self(Mutex::new(vec![PromptResult::Entered(Zeroizing::new(
                secret.to_string(),
            ))])))
        }

        fn canceled() -> Arc<Self> {
            Arc::new(Self(Mutex::new(vec![PromptResult::Canceled])))
        }
    }

    impl SecretPrompt for ScriptedPrompt {
        fn read_secret(&self, _label: &str) -> PromptResult {
            self.0
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(PromptResult::Failed("no more input".to_string()))
        }
    }

    fn enrolled(dir: &TempDir, password: &str) -> PathBuf {
        let path = dir.path().join("credential");
        std::fs::write(&path, hash_password(password).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_hash_and_check() {
        let phc = hash_password("correct horse").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(check_password("correct horse", &phc).unwrap());
        assert!(!check_password("battery staple", &phc).unwrap());
        assert!(check_password("x", "not a hash").is_err());
    }

    #[tokio::test]
    async fn test_password_verified_and_rejected() {
        let dir = TempDir::new().unwrap();
        let path = enrolled(&dir, "correct horse");

        let ok = PasswordVerifier::new(path.clone(), ScriptedPrompt::typing("correct horse"));
        assert_eq!(ok.verify("test").await, VerifyResult::Verified);

        let bad = PasswordVerifier::new(path, ScriptedPrompt::typing("wrong"));
        assert_eq!(bad.verify("test").await, VerifyResult::Rejected);
    }

    #[tokio::test]
    async fn test_password_canceled() {
        let dir = TempDir::new().unwrap();
        let path = enrolled(&dir, "correct horse");
        let verifier = PasswordVerifier::new(path, ScriptedPrompt::canceled());
        assert_eq!(verifier.verify("test").await, VerifyResult::Canceled);
    }

    #[tokio::test]
    async fn test_missing_credential_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let verifier = PasswordVerifier::new(
            dir.path().join("absent"),
            ScriptedPrompt::typing("anything"),
        );
        assert!(matches!(
            verifier.verify("test").await,
            VerifyResult::Unavailable(_)
        ));
    }

    #[test]
    fn test_classify_biometric_output() {
        assert_eq!(
            classify_biometric_output(true, "Verify result: verify-match (done)"),
            VerifyResult::Verified
        );
        assert_eq!(
            classify_biometric_output(false, "Verify result: verify-no-match (done)"),
            VerifyResult::Rejected
        );
        assert!(matches!(
            classify_biometric_output(false, "No devices available"),
            VerifyResult::Unavailable(_)
        ));
        assert!(matches!(
            classify_biometric_output(
                false,
                "ListEnrolledFingers failed: net.reactivated.Fprint.Error.NoEnrolledPrints"
            ),
            VerifyResult::Unavailable(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_biometric_helper_is_unavailable() {
        let verifier = BiometricVerifier::new(
            PathBuf::from("/nonexistent/fprintd-verify"),
            Duration::from_secs(1),
        );
        assert!(matches!(
            verifier.verify("test").await,
            VerifyResult::Unavailable(_)
        ));
    }
}
