//! Session policy: who may run the tool, and from where

use std::fmt;

/// Snapshot of the invoking session, shown in the test-mode report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionStatus {
    pub user: String,
    pub is_administrator: bool,
    pub session: String,
    pub is_console: bool,
}

impl PermissionStatus {
    pub fn current() -> Self {
        Self {
            user: current_user(),
            is_administrator: is_administrator(),
            session: session_name(),
            is_console: is_console_session(),
        }
    }
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Current User: {}", self.user)?;
        writeln!(f, "  Is Administrator: {}", self.is_administrator)?;
        writeln!(f, "  Session: {}", self.session)?;
        write!(f, "  Is Console Session: {}", self.is_console)
    }
}

/// Operator name used to key the rate-limit record
///
/// Taken from the process credentials, never from the environment, so a
/// changed `USER` cannot buy a fresh record.
#[cfg(unix)]
pub fn current_user() -> String {
    let Some(uid) = std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| parse_real_uid(&status))
    else {
        return "unknown".to_string();
    };
    std::fs::read_to_string("/etc/passwd")
        .ok()
        .and_then(|passwd| user_for_uid(&passwd, uid))
        .unwrap_or_else(|| format!("uid-{}", uid))
}

/// Account that owns the process token, as `whoami` reports it
#[cfg(windows)]
pub fn current_user() -> String {
    std::process::Command::new("whoami")
        .stderr(std::process::Stdio::null())
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn uid_field(status: &str, index: usize) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(index))
        .and_then(|id| id.parse().ok())
}

/// Real UID from the contents of `/proc/self/status`
pub fn parse_real_uid(status: &str) -> Option<u32> {
    uid_field(status, 0)
}

/// Effective UID from the contents of `/proc/self/status`
pub fn parse_effective_uid(status: &str) -> Option<u32> {
    uid_field(status, 1)
}

/// Login name for `uid` in `/etc/passwd` format
pub fn user_for_uid(passwd: &str, uid: u32) -> Option<String> {
    passwd.lines().find_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next().filter(|name| !name.is_empty())?;
        let id = fields.nth(1)?.parse::<u32>().ok()?;
        (id == uid).then(|| name.to_string())
    })
}

#[cfg(unix)]
pub fn is_administrator() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| parse_effective_uid(&status))
        .map(|euid| euid == 0)
        .unwrap_or(false)
}

/// `net session` only succeeds from an elevated token
#[cfg(windows)]
pub fn is_administrator() -> bool {
    std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Whether a session with these markers sits at the physical console
pub fn console_from_env(ssh_connection: Option<&str>, ssh_tty: Option<&str>) -> bool {
    let present = |v: Option<&str>| v.is_some_and(|v| !v.is_empty());
    !present(ssh_connection) && !present(ssh_tty)
}

#[cfg(unix)]
pub fn is_console_session() -> bool {
    console_from_env(
        std::env::var("SSH_CONNECTION").ok().as_deref(),
        std::env::var("SSH_TTY").ok().as_deref(),
    )
}

#[cfg(windows)]
pub fn is_console_session() -> bool {
    session_name().eq_ignore_ascii_case("Console")
}

#[cfg(unix)]
pub fn session_name() -> String {
    if is_console_session() {
        std::env::var("XDG_SESSION_TYPE").unwrap_or_else(|_| "console".to_string())
    } else {
        "ssh".to_string()
    }
}

#[cfg(windows)]
pub fn session_name() -> String {
    std::env::var("SESSIONNAME").unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_effective_uid() {
        let status = "Name:\tunwarp\nUmask:\t0022\nUid:\t1000\t0\t0\t0\nGid:\t1000\t1000\t1000\t1000\n";
        assert_eq!(parse_effective_uid(status), Some(0));
        assert_eq!(parse_effective_uid("Uid:\t1000\t1000\t1000\t1000\n"), Some(1000));
        assert_eq!(parse_effective_uid("Name:\tx\n"), None);
    }

    #[test]
    fn test_parse_real_uid() {
        // setuid root binary run by uid 1000
        let status = "Name:\tunwarp\nUid:\t1000\t0\t0\t0\n";
        assert_eq!(parse_real_uid(status), Some(1000));
        assert_eq!(parse_real_uid("Uid:\n"), None);
    }

    #[test]
    fn test_user_for_uid() {
        let passwd = "root:x:0:0:root:/root:/bin/bash\n\
                      # comment\n\
                      alice:x:1000:1000:Alice:/home/alice:/bin/zsh\n";
        assert_eq!(user_for_uid(passwd, 0).as_deref(), Some("root"));
        assert_eq!(user_for_uid(passwd, 1000).as_deref(), Some("alice"));
        assert_eq!(user_for_uid(passwd, 1001), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_current_user_ignores_environment() {
        let before = current_user();
        std::env::set_var("USER", "someone-else");
        std::env::set_var("USERNAME", "someone-else");
        assert_eq!(current_user(), before);
    }

    #[test]
    fn test_console_from_env() {
        assert!(console_from_env(None, None));
        assert!(console_from_env(Some(""), None));
        assert!(!console_from_env(Some("10.0.0.2 50000 10.0.0.1 22"), None));
        assert!(!console_from_env(None, Some("/dev/pts/3")));
    }

    #[test]
    fn test_status_report() {
        let status = PermissionStatus {
            user: "alice".to_string(),
            is_administrator: true,
            session: "tty".to_string(),
            is_console: true,
        };
        let report = status.to_string();
        assert!(report.contains("Current User: alice"));
        assert!(report.contains("Is Console Session: true"));
    }
}
