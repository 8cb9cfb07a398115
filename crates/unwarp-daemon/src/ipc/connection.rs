//! Control-channel endpoint
//!
//! The service claims the endpoint once, takes clients one at a time and
//! releases the endpoint when it stops. Clients reach it with
//! [`open_channel`].

use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Listening end of the control channel
#[async_trait]
pub trait ChannelListener: Sized + Send {
    /// One client's connection
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Take ownership of `endpoint`, refusing one held by a live service
    async fn claim(endpoint: &Path) -> Result<Self>;

    /// Wait for the next client
    async fn next_client(&mut self) -> Result<Self::Stream>;

    /// Give the endpoint back
    async fn release(self) -> Result<()>;
}

#[cfg(unix)]
pub use super::unix::{open_channel, ClientStream, SocketListener as PlatformListener};

#[cfg(windows)]
pub use super::windows::{open_channel, ClientStream, PipeListener as PlatformListener};
