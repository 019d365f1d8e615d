//! # lime-collector
//!
//! Forensic memory acquisition across a fleet of remote Linux hosts.
//!
//! ## Overview
//!
//! For every host in a batch configuration, lime-collector authenticates over
//! SSH, uploads and loads a LiME kernel module, opens a forwarding tunnel,
//! streams the raw memory image back through it and persists the image either
//! to an S3 bucket or to a local file. Hosts are processed concurrently on a
//! bounded worker pool; a failure on one host never affects another.
//!
//! ## Features
//!
//! - **Key, encrypted key or password auth** selected per host
//! - **Module lookup by kernel version** in a local module repository
//! - **Bounded readiness polling** with exponential backoff
//! - **Streaming multipart upload** to S3, with live credential probing and
//!   local-file fallback
//! - **SHA-256 of every image** recorded in a JSON batch report
//! - **Guaranteed cleanup**: module unload and tunnel close on every exit path
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//!
//! use lime_collector::acquisition::{run_batch, PipelineContext};
//! use lime_collector::cloud::S3ObjectStore;
//! use lime_collector::config::{build_jobs, BatchConfig};
//! use lime_collector::remote::SshTransport;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = BatchConfig::from_yaml_file(Path::new("fleet.yaml"))?;
//! let (jobs, workers) = build_jobs(&config)?;
//!
//! let ctx = PipelineContext {
//!     transport: Arc::new(SshTransport::default()),
//!     store: Arc::new(S3ObjectStore::new(Arc::new(tokio::runtime::Runtime::new()?), None)),
//!     output_dir: PathBuf::from("images"),
//! };
//!
//! let result = run_batch(jobs, workers, &ctx)?;
//! println!("{} succeeded, {} failed", result.succeeded(), result.failed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface definitions
//! - [`models`]: Host descriptors, job specs, sink decisions and outcomes
//! - [`error`]: Host-scoped error taxonomy
//! - [`config`]: YAML batch configuration and the job builder
//! - [`remote`]: SSH sessions, tunnel, auth selection and module repository
//! - [`cloud`]: S3 object store and multipart image upload
//! - [`acquisition`]: Provisioner, sink selector, pipeline and orchestrator
//! - [`security`]: Credential scrubbing
//! - [`utils`]: Hashing and batch summary
//! - [`logging`]: Logger initialisation
//! - [`constants`]: Application-wide constants

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Core data models and structures used throughout the application
pub mod models;

/// Error taxonomy for host pipelines
pub mod error;

/// Utility functions for hashing and reporting
pub mod utils;

/// Object storage integration (S3)
pub mod cloud;

/// Batch configuration and job building
pub mod config;

/// Remote host access over SSH
pub mod remote;

/// Per-host pipeline and batch orchestration
pub mod acquisition;

/// Logger initialisation
pub mod logging;

/// Application constants and configuration values
pub mod constants;

/// Security utilities for credential protection
pub mod security;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
