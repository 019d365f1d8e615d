//! Memory acquisition across a fleet of hosts.
//!
//! This module contains the per-host pipeline and everything it drives:
//!
//! - [`provisioner`]: which module binary a host receives, and its upload
//! - [`sink`]: object storage or local file for the captured image
//! - [`capture`]: streaming the image from the tunnel into the sink
//! - [`pipeline`]: the per-host state machine and its cleanup guard
//! - [`orchestrator`]: bounded worker pool running one pipeline per host
//!
//! ## Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use lime_collector::acquisition::{run_batch, PipelineContext};
//! use lime_collector::cloud::S3ObjectStore;
//! use lime_collector::config::{build_jobs, BatchConfig};
//! use lime_collector::remote::SshTransport;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = BatchConfig::from_yaml_file(std::path::Path::new("fleet.yaml"))?;
//! let (jobs, workers) = build_jobs(&config)?;
//!
//! let runtime = Arc::new(tokio::runtime::Runtime::new()?);
//! let ctx = PipelineContext {
//!     transport: Arc::new(SshTransport::default()),
//!     store: Arc::new(S3ObjectStore::new(runtime, None)),
//!     output_dir: PathBuf::from("images"),
//! };
//!
//! let result = run_batch(jobs, workers, &ctx)?;
//! println!("{} of {} hosts captured", result.succeeded(), result.outcomes.len());
//! # Ok(())
//! # }
//! ```

/// Module resolution and upload
pub mod provisioner;

/// Sink selection
pub mod sink;

/// Image streaming and persistence
pub mod capture;

/// Per-host acquisition state machine
pub mod pipeline;

/// Batch orchestration
pub mod orchestrator;

pub use orchestrator::{run_batch, BatchResult};
pub use pipeline::{run_pipeline, PipelineContext};
pub use sink::select_sink;
