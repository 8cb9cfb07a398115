//! DNS and adapter recovery using the platform's network tools

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::capabilities::NetworkControl;
use crate::error::{DaemonError, Result};

use super::command::{capture, wait_until};

const STATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Network recovery through external tools
#[derive(Debug, Clone)]
pub struct SystemNetwork {
    command_timeout: Duration,
}

impl SystemNetwork {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

/// Reported state of a system service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
    /// Starting, stopping or otherwise in transition
    Pending,
}

#[cfg(unix)]
impl SystemNetwork {
    async fn service_state(&self, service: &str) -> Result<ServiceState> {
        let captured = capture("systemctl", &["is-active", service], self.command_timeout).await?;
        Ok(parse_systemctl_state(&captured.stdout))
    }

    async fn service_action(&self, action: &str, service: &str) -> Result<()> {
        capture("systemctl", &[action, service], self.command_timeout)
            .await?
            .require_success(&format!("systemctl {} {}", action, service))?;
        Ok(())
    }
}

#[cfg(unix)]
#[async_trait]
impl NetworkControl for SystemNetwork {
    async fn flush_dns(&self, timeout: Duration) -> Result<()> {
        capture("resolvectl", &["flush-caches"], timeout)
            .await?
            .require_success("resolvectl flush-caches")?;
        Ok(())
    }

    async fn restart_dns_service(&self, service: &str, state_timeout: Duration) -> Result<()> {
        restart_with(self, service, state_timeout).await
    }

    async fn connected_adapters(&self) -> Result<Vec<String>> {
        let captured = capture(
            "nmcli",
            &["-t", "-f", "DEVICE,STATE", "device"],
            self.command_timeout,
        )
        .await?
        .require_success("nmcli device")?;
        Ok(parse_nmcli_devices(&captured.stdout))
    }

    async fn set_adapter_enabled(&self, adapter: &str, enabled: bool) -> Result<()> {
        let state = if enabled { "up" } else { "down" };
        capture(
            "ip",
            &["link", "set", "dev", adapter, state],
            self.command_timeout,
        )
        .await?
        .require_success(&format!("ip link set {} {}", adapter, state))?;
        Ok(())
    }
}

#[cfg(windows)]
impl SystemNetwork {
    async fn service_state(&self, service: &str) -> Result<ServiceState> {
        let captured = capture("sc", &["query", service], self.command_timeout)
            .await?
            .require_success(&format!("sc query {}", service))?;
        Ok(parse_sc_state(&captured.stdout))
    }

    async fn service_action(&self, action: &str, service: &str) -> Result<()> {
        capture("sc", &[action, service], self.command_timeout)
            .await?
            .require_success(&format!("sc {} {}", action, service))?;
        Ok(())
    }
}

#[cfg(windows)]
#[async_trait]
impl NetworkControl for SystemNetwork {
    async fn flush_dns(&self, timeout: Duration) -> Result<()> {
        capture("ipconfig", &["/flushdns"], timeout)
            .await?
            .require_success("ipconfig /flushdns")?;
        Ok(())
    }

    async fn restart_dns_service(&self, service: &str, state_timeout: Duration) -> Result<()> {
        restart_with(self, service, state_timeout).await
    }

    async fn connected_adapters(&self) -> Result<Vec<String>> {
        let captured = capture(
            "netsh",
            &["interface", "show", "interface"],
            self.command_timeout,
        )
        .await?
        .require_success("netsh interface show interface")?;
        Ok(parse_netsh_interfaces(&captured.stdout))
    }

    async fn set_adapter_enabled(&self, adapter: &str, enabled: bool) -> Result<()> {
        let name = format!("name={}", adapter);
        let admin = if enabled { "admin=enabled" } else { "admin=disabled" };
        capture(
            "netsh",
            &["interface", "set", "interface", name.as_str(), admin],
            self.command_timeout,
        )
        .await?
        .require_success(&format!("netsh set interface {}", adapter))?;
        Ok(())
    }
}

/// Stop the service if it is running, wait for it to stop, then start it
/// and wait for it to run
async fn restart_with(net: &SystemNetwork, service: &str, state_timeout: Duration) -> Result<()> {
    if net.service_state(service).await? == ServiceState::Running {
        net.service_action("stop", service).await?;
        let stopped = wait_until(state_timeout, STATE_POLL_INTERVAL, || async move {
            Ok(net.service_state(service).await? == ServiceState::Stopped)
        })
        .await?;
        if !stopped {
            return Err(DaemonError::Capability(format!(
                "{} did not stop within {:?}",
                service, state_timeout
            )));
        }
        debug!("{} stopped", service);
    }

    net.service_action("start", service).await?;
    let running = wait_until(state_timeout, STATE_POLL_INTERVAL, || async move {
        Ok(net.service_state(service).await? == ServiceState::Running)
    })
    .await?;
    if !running {
        return Err(DaemonError::Capability(format!(
            "{} did not start within {:?}",
            service, state_timeout
        )));
    }

    info!("{} restarted", service);
    Ok(())
}

/// Map `systemctl is-active` output to a state
pub fn parse_systemctl_state(output: &str) -> ServiceState {
    match output.trim() {
        "active" => ServiceState::Running,
        "inactive" | "failed" | "unknown" => ServiceState::Stopped,
        _ => ServiceState::Pending,
    }
}

/// Map `sc query` output to a state from its `STATE : 4 RUNNING` line
pub fn parse_sc_state(output: &str) -> ServiceState {
    let state_line = output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("STATE"));

    match state_line {
        Some(line) if line.contains("RUNNING") => ServiceState::Running,
        Some(line) if line.contains("STOPPED") => ServiceState::Stopped,
        _ => ServiceState::Pending,
    }
}

/// Connected devices from `nmcli -t -f DEVICE,STATE device`, loopback excluded
pub fn parse_nmcli_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (device, state) = line.rsplit_once(':')?;
            let device = device.replace("\\:", ":");
            (state.trim() == "connected" && device != "lo").then_some(device)
        })
        .collect()
}

/// Connected interfaces from `netsh interface show interface`
///
/// Rows look like `Enabled  Connected  Dedicated  Ethernet 2`; the name is
/// everything after the third column and may contain spaces.
pub fn parse_netsh_interfaces(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut rest = line.trim();
            let mut columns = Vec::with_capacity(3);
            for _ in 0..3 {
                let (column, tail) = rest.split_once(char::is_whitespace)?;
                columns.push(column);
                rest = tail.trim_start();
            }
            (columns[1] == "Connected" && !rest.is_empty()).then(|| rest.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_systemctl_state() {
        assert_eq!(parse_systemctl_state("active\n"), ServiceState::Running);
        assert_eq!(parse_systemctl_state("inactive\n"), ServiceState::Stopped);
        assert_eq!(parse_systemctl_state("deactivating\n"), ServiceState::Pending);
    }

    #[test]
    fn test_parse_sc_state() {
        let running = "SERVICE_NAME: Dnscache\r\n        TYPE               : 30  WIN32\r\n        STATE              : 4  RUNNING\r\n";
        assert_eq!(parse_sc_state(running), ServiceState::Running);

        let stopped = "SERVICE_NAME: Dnscache\r\n        STATE              : 1  STOPPED\r\n";
        assert_eq!(parse_sc_state(stopped), ServiceState::Stopped);

        let pending = "        STATE              : 3  STOP_PENDING\r\n";
        assert_eq!(parse_sc_state(pending), ServiceState::Pending);
    }

    #[test]
    fn test_parse_nmcli_devices() {
        let output = "eth0:connected\nwlan0:disconnected\nlo:connected\nCloudflareWARP:connected\n";
        assert_eq!(
            parse_nmcli_devices(output),
            vec!["eth0".to_string(), "CloudflareWARP".to_string()]
        );
    }

    #[test]
    fn test_parse_netsh_interfaces() {
        let output = "\r\n\
Admin State    State          Type             Interface Name\r\n\
-------------------------------------------------------------------------\r\n\
Enabled        Connected      Dedicated        Ethernet 2\r\n\
Enabled        Disconnected   Dedicated        Wi-Fi\r\n\
Enabled        Connected      Dedicated        CloudflareWARP\r\n";
        assert_eq!(
            parse_netsh_interfaces(output),
            vec!["Ethernet 2".to_string(), "CloudflareWARP".to_string()]
        );
    }

    #[test]
    fn test_parse_netsh_no_adapters() {
        assert!(parse_netsh_interfaces("").is_empty());
    }
}
