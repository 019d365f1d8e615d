//! Global constants for the lime-collector application.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// SSH and tunnel constants
/// Default SSH port when a host does not specify one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Loopback address the tunnel listens on and forwards to
pub const LOOPBACK_ADDR: &str = "127.0.0.1";

/// Poll interval for the non-blocking tunnel pump (milliseconds)
pub const TUNNEL_POLL_INTERVAL_MS: u64 = 5;

/// Attempts made to connect to the local end of the tunnel
pub const CAPTURE_CONNECT_ATTEMPTS: usize = 5;

// Acquisition module constants
/// Filename the acquisition module is uploaded under on the remote host
pub const REMOTE_MODULE_NAME: &str = "lime.ko";

/// On-wire format requested from the acquisition module
pub const MODULE_FORMAT: &str = "lime";

/// Extension of persisted memory images
pub const IMAGE_EXTENSION: &str = "lime";

// Readiness polling constants
/// Maximum readiness polls before the module is declared failed
pub const READINESS_MAX_ATTEMPTS: u32 = 10;

/// First readiness backoff delay in milliseconds
pub const READINESS_BASE_DELAY_MS: u64 = 500;

/// Upper bound for a single readiness backoff delay in seconds
pub const READINESS_MAX_DELAY_SECS: u64 = 8;

// Worker pool constants
/// Worker count used when the configuration does not name one
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Token accepted in place of an integer worker count
pub const AUTO_WORKERS_TOKEN: &str = "auto";

/// Workers per CPU core when sizing the pool for "auto" (the work is I/O bound)
pub const AUTO_WORKERS_PER_CPU: usize = 4;

// Cloud storage constants
/// Smallest S3 upload part (8MB, S3 minimum is 5MB)
pub const S3_UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Largest S3 upload part (5GB S3 maximum)
pub const S3_MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Parts an image is split into at most, below the S3 limit of 10,000 so a
/// memory size that under-reports still fits
pub const S3_TARGET_PART_COUNT: u64 = 9_000;

/// Maximum upload retry attempts
pub const MAX_UPLOAD_RETRIES: usize = 3;

/// Base retry delay in milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 250;

// Capture constants
/// Buffer size for streaming the memory image (1MB)
pub const CAPTURE_BUFFER_SIZE: usize = 1024 * 1024;

/// Progress is logged every time this many percent of the image has arrived
pub const PROGRESS_STEP_PERCENT: u64 = 10;

// Report constants
/// Default filename for the batch summary
pub const SUMMARY_FILENAME: &str = "acquisition_summary.json";
