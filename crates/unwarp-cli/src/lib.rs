//! Unwarp CLI - Operator client for the break-glass VPN disconnect
//!
//! This crate provides the operator-facing half of unwarp: session policy
//! checks, the rate-limited authentication gate, and the client that asks
//! the privileged service to disconnect.

pub mod auth;
pub mod client;
pub mod commands;
pub mod policy;

pub use auth::{AuthGate, AuthOutcome, CredentialVerifier, VerifyResult};
pub use client::{ClientError, UnwarpClient};
pub use commands::{Cli, Session};
pub use policy::PermissionStatus;
