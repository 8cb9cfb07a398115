//! Windows named pipe endpoint
//!
//! Exactly one pipe instance exists at a time. Every instance is created as
//! the first instance of its name, so creation fails if another process
//! already holds the name. Remote clients are rejected, and the DACL grants
//! access only to Administrators and LocalSystem.

use async_trait::async_trait;
use std::ffi::{c_void, OsStr};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use tokio::net::windows::named_pipe::{
    ClientOptions, NamedPipeClient, NamedPipeServer, PipeMode, ServerOptions,
};
use tracing::debug;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{LocalFree, BOOL, ERROR_PIPE_BUSY, HLOCAL};
use windows::Win32::Security::Authorization::{
    ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1,
};
use windows::Win32::Security::{PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES};

use crate::error::{DaemonError, Result};

use super::connection::ChannelListener;

/// Client side of the pipe
pub type ClientStream = NamedPipeClient;

/// Protected DACL: full control for BUILTIN\Administrators and LocalSystem
const PIPE_SDDL: &str = "D:P(A;;GA;;;BA)(A;;GA;;;SY)";

const PIPE_PREFIX: &str = r"\\.\pipe\";

const PIPE_BUFFER_SIZE: u32 = 4096;

fn wide(value: &str) -> Vec<u16> {
    OsStr::new(value)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Security descriptor parsed from [`PIPE_SDDL`], freed on drop
struct PipeSecurity {
    descriptor: PSECURITY_DESCRIPTOR,
}

impl PipeSecurity {
    fn new() -> Result<Self> {
        let sddl = wide(PIPE_SDDL);
        let mut descriptor = PSECURITY_DESCRIPTOR::default();
        unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                PCWSTR(sddl.as_ptr()),
                SDDL_REVISION_1,
                &mut descriptor,
                None,
            )
        }
        .map_err(|e| DaemonError::Ipc(format!("Invalid pipe security descriptor: {}", e)))?;
        Ok(Self { descriptor })
    }

    fn attributes(&self) -> SECURITY_ATTRIBUTES {
        SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: self.descriptor.0,
            bInheritHandle: BOOL::from(false),
        }
    }
}

impl Drop for PipeSecurity {
    fn drop(&mut self) {
        if !self.descriptor.0.is_null() {
            unsafe {
                let _ = LocalFree(HLOCAL(self.descriptor.0));
            }
        }
    }
}

/// Create the one listening instance of `pipe_name`
fn create_instance(pipe_name: &str) -> Result<NamedPipeServer> {
    let security = PipeSecurity::new()?;
    let mut attributes = security.attributes();

    // Safety: `attributes` and the descriptor it points at outlive the call
    let server = unsafe {
        ServerOptions::new()
            .first_pipe_instance(true)
            .reject_remote_clients(true)
            .max_instances(1)
            .pipe_mode(PipeMode::Byte)
            .in_buffer_size(PIPE_BUFFER_SIZE)
            .out_buffer_size(PIPE_BUFFER_SIZE)
            .create_with_security_attributes_raw(
                pipe_name,
                &mut attributes as *mut SECURITY_ATTRIBUTES as *mut c_void,
            )
    };
    server.map_err(|e| DaemonError::Ipc(format!("Cannot create pipe {}: {}", pipe_name, e)))
}

/// Named pipe listener holding at most one idle instance
pub struct PipeListener {
    pipe_name: String,
    idle: Option<NamedPipeServer>,
}

#[async_trait]
impl ChannelListener for PipeListener {
    type Stream = NamedPipeServer;

    async fn claim(endpoint: &Path) -> Result<Self> {
        let pipe_name = endpoint.to_string_lossy().into_owned();
        if !pipe_name.starts_with(PIPE_PREFIX) {
            return Err(DaemonError::Config(format!(
                "Windows pipe name must start with {}",
                PIPE_PREFIX
            )));
        }

        let idle = create_instance(&pipe_name)?;
        Ok(Self {
            pipe_name,
            idle: Some(idle),
        })
    }

    async fn next_client(&mut self) -> Result<NamedPipeServer> {
        // The previous client's instance was dropped after its exchange
        let server = match self.idle.take() {
            Some(server) => server,
            None => create_instance(&self.pipe_name)?,
        };
        server
            .connect()
            .await
            .map_err(|e| DaemonError::Ipc(format!("Pipe connect failed: {}", e)))?;
        Ok(server)
    }

    async fn release(self) -> Result<()> {
        debug!("Closing pipe {}", self.pipe_name);
        Ok(())
    }
}

/// Open the service's pipe
pub async fn open_channel(endpoint: &Path) -> Result<ClientStream> {
    ClientOptions::new()
        .pipe_mode(PipeMode::Byte)
        .open(endpoint)
        .map_err(|e| {
            if e.raw_os_error() == Some(ERROR_PIPE_BUSY.0 as i32) {
                DaemonError::Ipc("Pipe busy".to_string())
            } else {
                debug!("Cannot open {:?}: {}", endpoint, e);
                DaemonError::ServiceUnavailable
            }
        })
}
