//! Control channel between the client and the privileged service
//!
//! One connection carries exactly one newline-terminated request and one
//! newline-terminated response. Unix domain sockets are used on Unix-like
//! systems and a single-instance named pipe on Windows.

mod client;
mod connection;
mod server;

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

// Public API
pub use client::ServiceClient;
pub use server::IpcServer;
