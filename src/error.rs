//! Error types for the acquisition pipeline
//!
//! Every failure a host's pipeline can hit is expressed as an
//! [`AcquisitionError`]. Errors are host-scoped: the pipeline converts them
//! into a failed `HostOutcome` and nothing propagates to the orchestrator.

use std::fmt;

use serde::Serialize;

/// Result type alias for pipeline stages
pub type AcquisitionResult<T> = std::result::Result<T, AcquisitionError>;

/// Coarse error category reported in the batch summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Authentication,
    Provisioning,
    ReadinessTimeout,
    Capture,
    Sink,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Provisioning => "provisioning",
            ErrorKind::ReadinessTimeout => "readiness timeout",
            ErrorKind::Capture => "capture",
            ErrorKind::Sink => "sink",
        };
        write!(f, "{}", name)
    }
}

/// Failure of one stage of a host's acquisition
#[derive(Debug)]
pub enum AcquisitionError {
    /// Malformed configuration value (worker count, host list, ...)
    Configuration { message: String },

    /// Neither a key file nor a password was configured for the host
    NoAuthMethod { host: String },

    /// Transport or credential failure while opening a session
    Authentication { host: String, source: anyhow::Error },

    /// Module resolution or upload failed
    Provisioning { host: String, source: anyhow::Error },

    /// No module exists for the host's kernel
    ModuleNotFound { host: String, kernel_version: String },

    /// The load command could not be issued
    ModuleLoad { host: String, source: anyhow::Error },

    /// The module never reported that it is listening
    ReadinessTimeout { host: String, port: u16 },

    /// Reading the image through the tunnel failed
    Capture { host: String, source: anyhow::Error },

    /// Neither sink could persist the image
    Sink { host: String, source: anyhow::Error },
}

impl AcquisitionError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        AcquisitionError::Configuration { message: message.into() }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquisitionError::Configuration { .. } | AcquisitionError::NoAuthMethod { .. } => {
                ErrorKind::Configuration
            }
            AcquisitionError::Authentication { .. } => ErrorKind::Authentication,
            AcquisitionError::Provisioning { .. }
            | AcquisitionError::ModuleNotFound { .. }
            | AcquisitionError::ModuleLoad { .. } => ErrorKind::Provisioning,
            AcquisitionError::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            AcquisitionError::Capture { .. } => ErrorKind::Capture,
            AcquisitionError::Sink { .. } => ErrorKind::Sink,
        }
    }

    /// Host the error originated from, if any
    pub fn host(&self) -> Option<&str> {
        match self {
            AcquisitionError::Configuration { .. } => None,
            AcquisitionError::NoAuthMethod { host }
            | AcquisitionError::Authentication { host, .. }
            | AcquisitionError::Provisioning { host, .. }
            | AcquisitionError::ModuleNotFound { host, .. }
            | AcquisitionError::ModuleLoad { host, .. }
            | AcquisitionError::ReadinessTimeout { host, .. }
            | AcquisitionError::Capture { host, .. }
            | AcquisitionError::Sink { host, .. } => Some(host),
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::Configuration { message } => {
                write!(f, "Configuration error: {}", message)
            }
            AcquisitionError::NoAuthMethod { host } => {
                write!(f, "{}: no authentication method could be determined (set keyfile and/or password)", host)
            }
            AcquisitionError::Authentication { host, source } => {
                write!(f, "{}: authentication failed: {:#}", host, source)
            }
            AcquisitionError::Provisioning { host, source } => {
                write!(f, "{}: module provisioning failed: {:#}", host, source)
            }
            AcquisitionError::ModuleNotFound { host, kernel_version } => {
                write!(f, "{}: cannot find module for kernel version {}", host, kernel_version)
            }
            AcquisitionError::ModuleLoad { host, source } => {
                write!(f, "{}: failed to issue module load: {:#}", host, source)
            }
            AcquisitionError::ReadinessTimeout { host, port } => {
                write!(f, "{}: module failed to signal readiness on port {}", host, port)
            }
            AcquisitionError::Capture { host, source } => {
                write!(f, "{}: memory capture failed: {:#}", host, source)
            }
            AcquisitionError::Sink { host, source } => {
                write!(f, "{}: failed to persist image: {:#}", host, source)
            }
        }
    }
}

impl std::error::Error for AcquisitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AcquisitionError::Authentication { source, .. }
            | AcquisitionError::Provisioning { source, .. }
            | AcquisitionError::ModuleLoad { source, .. }
            | AcquisitionError::Capture { source, .. }
            | AcquisitionError::Sink { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
