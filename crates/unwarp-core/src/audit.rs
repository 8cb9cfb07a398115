//! Append-only audit sink
//!
//! Both the client and the service report what they did to an audit sink.
//! Recording never fails from the caller's point of view: sinks swallow
//! their own I/O errors so logging cannot break the primary operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Severity of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
}

/// One recorded audit event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Which side wrote the entry (`client` or `service`)
    pub source: String,
    pub message: String,
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, message: &str, severity: Severity);

    fn info(&self, message: &str) {
        self.record(message, Severity::Information);
    }

    fn warning(&self, message: &str) {
        self.record(message, Severity::Warning);
    }

    fn error(&self, message: &str) {
        self.record(message, Severity::Error);
    }
}

/// Emits audit entries as tracing events on the `unwarp::audit` target
pub struct TracingAuditSink {
    source: &'static str,
}

impl TracingAuditSink {
    pub fn new(source: &'static str) -> Self {
        Self { source }
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Information => {
                tracing::info!(target: "unwarp::audit", source = self.source, "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(target: "unwarp::audit", source = self.source, "{}", message)
            }
            Severity::Error => {
                tracing::error!(target: "unwarp::audit", source = self.source, "{}", message)
            }
        }
    }
}

/// Appends JSON lines to a log file
pub struct FileAuditSink {
    path: PathBuf,
    source: String,
    lock: Mutex<()>,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let _guard = self.lock.lock().map_err(|_| std::io::ErrorKind::Other)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, message: &str, severity: Severity) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            severity,
            source: self.source.clone(),
            message: message.to_string(),
        };
        // Audit failures are never surfaced
        let _ = self.append(&entry);
    }
}

/// Keeps entries in memory; used by tests and the dry-run report
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Entries whose message contains `needle`
    pub fn matching(&self, needle: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.message.contains(needle))
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, message: &str, severity: Severity) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(AuditEntry {
                timestamp: Utc::now(),
                severity,
                source: "memory".to_string(),
                message: message.to_string(),
            });
        }
    }
}

/// Forwards every entry to several sinks
#[derive(Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, message: &str, severity: Severity) {
        for sink in &self.sinks {
            sink.record(message, severity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_sink_appends_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs").join("audit.jsonl");
        let sink = FileAuditSink::new(&path, "service");

        sink.info("Unwarp service started");
        sink.warning("StepFailure [cli.disconnect]: exit code 1");

        let content = std::fs::read_to_string(&path).unwrap();
        let entries: Vec<AuditEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, "service");
        assert_eq!(entries[1].severity, Severity::Warning);
    }

    #[test]
    fn test_file_sink_swallows_errors() {
        let temp_dir = TempDir::new().unwrap();
        // A directory cannot be opened for append
        let sink = FileAuditSink::new(temp_dir.path(), "client");
        sink.error("this must not panic");
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemoryAuditSink::new());
        let b = Arc::new(MemoryAuditSink::new());
        let fanout = FanoutAuditSink::new(vec![a.clone() as Arc<dyn AuditSink>, b.clone()]);

        fanout.warning("rate limit: blocked");

        assert_eq!(a.entries().len(), 1);
        assert_eq!(b.matching("rate limit").len(), 1);
    }
}
