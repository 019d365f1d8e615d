//! Remote host access over SSH.
//!
//! The acquisition pipeline never talks to `ssh2` directly. It drives three
//! collaborator traits:
//!
//! - [`RemoteSession`]: command execution, file upload and readiness polling
//! - [`TunnelSession`]: local port forwarding used to stream the image
//! - [`Transport`]: opens the two sessions above and the capture stream
//!
//! [`SshTransport`] is the production implementation. Tests substitute
//! scripted fakes.
//!
//! ## Architecture
//!
//! ```text
//!   pipeline ──connect_remote──▶ SshRemoteSession ──exec/scp──▶ host:22
//!      │
//!      ├──connect_tunnel──▶ SshTunnel ──direct-tcpip──▶ host:127.0.0.1:<port>
//!      │                       ▲
//!      └──open_capture──▶ 127.0.0.1:<port> (local listener)
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::models::{AuthMethod, CaptureTarget, HostDescriptor};

/// Authentication method selection and ssh2 authentication
pub mod auth;

/// Readiness polling policy
pub mod readiness;

/// Local repository of prebuilt acquisition modules
pub mod repository;

/// ssh2-backed remote command session
pub mod session;

/// ssh2-backed port forwarding tunnel
pub mod tunnel;

/// Production transport wiring sessions together
pub mod transport;

pub use auth::select_auth_method;
pub use readiness::ReadinessPolicy;
pub use repository::ModuleRepository;
pub use transport::{SshSettings, SshTransport};

/// Command channel to a target host
pub trait RemoteSession {
    /// Copy a local file to the remote working directory under `remote_name`
    fn upload_file(&mut self, local_path: &Path, remote_name: &str) -> Result<()>;

    /// Start a command without waiting for it to finish
    fn execute_async(&mut self, command: &str) -> Result<()>;

    /// Run a command to completion and return its exit status
    fn execute(&mut self, command: &str) -> Result<i32>;

    /// Poll until something listens on `port`. Returns `false` when the
    /// policy's attempts are exhausted or the load command failed.
    fn wait_for_ready(&mut self, port: u16) -> Result<bool>;

    /// Running kernel release (`uname -r`)
    fn kernel_version(&mut self) -> Result<String>;

    /// Physical memory size in bytes
    fn memory_size(&mut self) -> Result<u64>;

    /// Find a prebuilt module for `kernel_version`
    fn lookup_module_for_kernel(&mut self, kernel_version: &str) -> Result<Option<PathBuf>>;
}

/// Forwarding tunnel to a target host
pub trait TunnelSession {
    /// Forward `127.0.0.1:local_port` to `target_host:target_port` as seen from the remote
    fn start_forward(&mut self, local_port: u16, target_host: &str, target_port: u16) -> Result<()>;

    /// Stop forwarding and close the connection. Safe to call more than once.
    fn cleanup(&mut self) -> Result<()>;
}

/// Factory for the sessions a pipeline owns.
///
/// Implementations are shared by every worker, so they must be `Send + Sync`;
/// the sessions they return are owned by a single pipeline.
pub trait Transport: Send + Sync {
    fn connect_remote(&self, host: &HostDescriptor, auth: &AuthMethod) -> Result<Box<dyn RemoteSession>>;

    fn connect_tunnel(&self, host: &HostDescriptor, auth: &AuthMethod) -> Result<Box<dyn TunnelSession>>;

    /// Open the image stream at the local end of the tunnel
    fn open_capture(&self, target: &CaptureTarget) -> Result<Box<dyn Read>>;
}
