//! Unwarp Core - Shared types and persisted state for the break-glass tool
//!
//! This crate provides the pieces both sides of the control channel agree on:
//! the wire vocabulary, the per-operator authentication record, the
//! disconnect outcome model, the key/value store used for rate limiting and
//! machine-wide settings, and the audit sink.

pub mod audit;
pub mod error;
pub mod settings;
pub mod store;
pub mod types;

pub use audit::{
    AuditEntry, AuditSink, FanoutAuditSink, FileAuditSink, MemoryAuditSink, Severity,
    TracingAuditSink,
};
pub use error::{CoreError, Error, Result};
pub use settings::{
    clamp_reconnect_base, read_reconnect_base, validate_reconnect_base, write_reconnect_base,
};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use types::{
    AuthState, DisconnectOutcome, RecoverySchedule, ServiceCommand, ServiceResponse, StepResult,
};

/// Default reconnect base in seconds (2 hours)
pub const DEFAULT_RECONNECT_BASE_SECS: u32 = 7200;

/// Smallest accepted reconnect base in seconds
pub const MIN_RECONNECT_BASE_SECS: u32 = 60;

/// Largest accepted reconnect base in seconds (12 hours)
pub const MAX_RECONNECT_BASE_SECS: u32 = 43200;

/// Machine-wide settings key holding the reconnect base
pub const RECONNECT_BASE_KEY: &str = "reconnectBaseSeconds";
