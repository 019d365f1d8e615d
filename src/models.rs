//! Core data models shared by the builder, the pipeline and the report.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{AUTO_WORKERS_PER_CPU, DEFAULT_SSH_PORT, IMAGE_EXTENSION};
use crate::error::ErrorKind;

/// Per-host settings that take precedence over the global configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostOverrides {
    /// Fixed tunnel/module port instead of an OS-assigned one
    pub tunnel_port: Option<u16>,
    /// Bucket used for this host instead of the global one
    pub bucket: Option<String>,
}

/// A target host as described in the configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct HostDescriptor {
    pub address: String,
    pub username: String,
    pub port: u16,
    pub module_path: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub password: Option<String>,
    pub overrides: HostOverrides,
}

impl HostDescriptor {
    /// Create a descriptor with no credentials and the default SSH port
    pub fn new(address: &str, username: &str) -> Self {
        Self {
            address: address.to_string(),
            username: username.to_string(),
            port: DEFAULT_SSH_PORT,
            module_path: None,
            key_file: None,
            password: None,
            overrides: HostOverrides::default(),
        }
    }

    /// Name of the persisted image for this host, `<address>-mem.<ext>`
    pub fn image_filename(&self) -> String {
        image_filename(&self.address)
    }
}

impl fmt::Debug for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDescriptor")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("port", &self.port)
            .field("module_path", &self.module_path)
            .field("key_file", &self.key_file)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("overrides", &self.overrides)
            .finish()
    }
}

/// Build the image filename for a host address
pub fn image_filename(address: &str) -> String {
    format!("{}-mem.{}", address, IMAGE_EXTENSION)
}

/// How a host is authenticated. Derived once per host, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Private key file without a passphrase
    KeyFile { key_file: PathBuf },
    /// Private key file protected by the configured password
    EncryptedKeyFile { key_file: PathBuf, passphrase: String },
    /// Plain password authentication
    Password { password: String },
}

impl AuthMethod {
    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::KeyFile { .. } => "key_file",
            AuthMethod::EncryptedKeyFile { .. } => "encrypted_key_file",
            AuthMethod::Password { .. } => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::KeyFile { key_file } => {
                f.debug_struct("KeyFile").field("key_file", key_file).finish()
            }
            AuthMethod::EncryptedKeyFile { key_file, .. } => f
                .debug_struct("EncryptedKeyFile")
                .field("key_file", key_file)
                .field("passphrase", &"<redacted>")
                .finish(),
            AuthMethod::Password { .. } => {
                f.debug_struct("Password").field("password", &"<redacted>").finish()
            }
        }
    }
}

/// Where log output goes. Both values default to the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogDestination {
    pub dir: String,
    pub prefix: String,
}

impl LogDestination {
    /// True when a log file should be written in addition to the terminal
    pub fn writes_file(&self) -> bool {
        !self.dir.is_empty() || !self.prefix.is_empty()
    }
}

/// Static object-storage credentials
#[derive(Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Object-storage settings inherited from the global configuration
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub secret: Option<String>,
    pub region: Option<String>,
}

impl StorageConfig {
    /// Static credentials, only when both halves are configured
    pub fn credentials(&self) -> Option<StorageCredentials> {
        match (&self.key, &self.secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(StorageCredentials {
                    access_key_id: key.clone(),
                    secret_access_key: secret.clone(),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}

/// The fully resolved unit of work for one host.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub host: HostDescriptor,
    pub logging: LogDestination,
    pub storage: Option<StorageConfig>,
}

/// Resolved worker-pool size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCount {
    Fixed(usize),
    Auto,
}

impl WorkerCount {
    /// Concrete pool size for a batch of `host_count` hosts.
    ///
    /// Never more workers than hosts. `Auto` is further capped at
    /// `AUTO_WORKERS_PER_CPU` workers per core.
    pub fn resolve(&self, host_count: usize) -> usize {
        match self {
            WorkerCount::Fixed(n) => (*n).min(host_count).max(1),
            WorkerCount::Auto => {
                let cap = num_cpus::get().max(1) * AUTO_WORKERS_PER_CPU;
                host_count.min(cap).max(1)
            }
        }
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerCount::Fixed(n) => write!(f, "{}", n),
            WorkerCount::Auto => write!(f, "auto"),
        }
    }
}

/// Which module binary a host receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleResolution {
    pub module_path: PathBuf,
    pub kernel_version: String,
}

/// Everything needed to read the image once the module is listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    pub local_addr: String,
    pub tunnel_port: u16,
    pub remote_addr: String,
    pub memory_size: u64,
    pub filename: String,
}

/// Persistence destination chosen for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkDecision {
    /// Upload to a bucket; `credentials` is `None` when ambient credentials are used
    ObjectStore {
        bucket: String,
        region: Option<String>,
        credentials: Option<StorageCredentials>,
    },
    LocalFile { path: PathBuf },
}

/// Kind of sink an image ended up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    ObjectStore,
    LocalFile,
}

/// Result of a successful capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReport {
    pub filename: String,
    /// `s3://bucket/key` or the local path
    pub location: String,
    pub sink: SinkKind,
    pub bytes: u64,
    pub sha256: String,
}

/// Terminal record for one host's pipeline
#[derive(Debug, Clone, Serialize)]
pub struct HostOutcome {
    pub host: String,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub image: Option<CaptureReport>,
    pub duration_secs: f64,
}
