//! Service configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path or Windows pipe name for the control channel
    pub ipc_socket_path: PathBuf,

    /// Machine-wide settings file (holds the reconnect base)
    pub settings_path: PathBuf,

    /// Append-only audit log
    pub audit_log_path: PathBuf,

    /// Path to the WARP command line client
    pub warp_cli_path: PathBuf,

    /// Process names terminated during a disconnect
    pub process_names: Vec<String>,

    /// Bound on `warp-cli disconnect` (seconds)
    pub cli_timeout_secs: u64,

    /// How long to wait for each terminated process to exit (seconds)
    pub process_exit_timeout_secs: u64,

    /// Bound on helper commands such as the DNS flush (seconds)
    pub command_timeout_secs: u64,

    /// Wait for the DNS service to reach stopped / running (seconds)
    pub service_state_timeout_secs: u64,

    /// DNS client service restarted during network recovery
    pub dns_service_name: String,

    /// Pause between disabling and re-enabling an adapter (milliseconds)
    pub adapter_settle_ms: u64,

    /// Bound on reading a request line from a client (seconds)
    pub request_timeout_secs: u64,

    /// Pause after a failed accept before listening again (milliseconds)
    pub accept_retry_delay_ms: u64,

    /// How long shutdown waits for the channel worker (seconds)
    pub shutdown_grace_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            ipc_socket_path: Self::default_ipc_path(),
            settings_path: Self::default_settings_path(),
            audit_log_path: Self::default_data_dir().join("audit.jsonl"),
            warp_cli_path: Self::default_warp_cli_path(),
            process_names: vec![
                "Cloudflare WARP".to_string(),
                "CloudflareWARP".to_string(),
                "warp-svc".to_string(),
                "warp-taskbar".to_string(),
            ],
            cli_timeout_secs: 10,
            process_exit_timeout_secs: 5,
            command_timeout_secs: 10,
            service_state_timeout_secs: 30,
            dns_service_name: Self::default_dns_service().to_string(),
            adapter_settle_ms: 2000,
            request_timeout_secs: 10,
            accept_retry_delay_ms: 1000,
            shutdown_grace_secs: 5,
        }
    }
}

impl DaemonConfig {
    /// Platform-appropriate default IPC path
    #[cfg(unix)]
    pub fn default_ipc_path() -> PathBuf {
        PathBuf::from("/run/unwarp/unwarp.sock")
    }

    #[cfg(windows)]
    pub fn default_ipc_path() -> PathBuf {
        // Windows named pipes use special path syntax
        PathBuf::from(r"\\.\pipe\UnwarpServicePipe")
    }

    /// Machine-wide data directory shared by client and service
    #[cfg(unix)]
    pub fn default_data_dir() -> PathBuf {
        PathBuf::from("/etc/unwarp")
    }

    #[cfg(windows)]
    pub fn default_data_dir() -> PathBuf {
        std::env::var_os("ProgramData")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
            .join("unwarp")
    }

    /// Settings path honoring the `UNWARP_SETTINGS` override
    pub fn default_settings_path() -> PathBuf {
        std::env::var_os("UNWARP_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::default_data_dir().join("settings.json"))
    }

    #[cfg(unix)]
    fn default_warp_cli_path() -> PathBuf {
        PathBuf::from("/usr/bin/warp-cli")
    }

    #[cfg(windows)]
    fn default_warp_cli_path() -> PathBuf {
        PathBuf::from(r"C:\Program Files\Cloudflare\Cloudflare WARP\warp-cli.exe")
    }

    #[cfg(unix)]
    fn default_dns_service() -> &'static str {
        "systemd-resolved"
    }

    #[cfg(windows)]
    fn default_dns_service() -> &'static str {
        "Dnscache"
    }

    /// Default location of the config file
    pub fn default_config_path() -> PathBuf {
        std::env::var_os("UNWARP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::default_data_dir().join("daemon.json"))
    }

    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would make the pipeline wait forever or do nothing
    pub fn validate(&self) -> crate::Result<()> {
        if self.process_names.iter().any(|n| n.trim().is_empty()) {
            return Err(crate::DaemonError::Config(
                "process_names must not contain empty entries".to_string(),
            ));
        }
        for (name, value) in [
            ("cli_timeout_secs", self.cli_timeout_secs),
            ("process_exit_timeout_secs", self.process_exit_timeout_secs),
            ("command_timeout_secs", self.command_timeout_secs),
            ("service_state_timeout_secs", self.service_state_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(crate::DaemonError::Config(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> crate::Result<()> {
        for path in [&self.settings_path, &self.audit_log_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Windows named pipes don't use filesystem paths
        #[cfg(unix)]
        {
            if let Some(parent) = self.ipc_socket_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(())
    }

    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs)
    }

    pub fn process_exit_timeout(&self) -> Duration {
        Duration::from_secs(self.process_exit_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn service_state_timeout(&self) -> Duration {
        Duration::from_secs(self.service_state_timeout_secs)
    }

    pub fn adapter_settle(&self) -> Duration {
        Duration::from_millis(self.adapter_settle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn accept_retry_delay(&self) -> Duration {
        Duration::from_millis(self.accept_retry_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
