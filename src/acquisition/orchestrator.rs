use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rayon::prelude::*;

use crate::acquisition::pipeline::{run_pipeline, PipelineContext};
use crate::error::ErrorKind;
use crate::models::{HostOutcome, JobSpec, WorkerCount};

/// Outcomes of every host in a batch, in job order
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub outcomes: Vec<HostOutcome>,
    pub workers: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Run one pipeline per job on a pool of `workers` threads.
///
/// Hosts are independent: a failure, including a panic, only affects the
/// outcome of the host it happened on. The only error is failing to build
/// the pool itself.
pub fn run_batch(jobs: Vec<JobSpec>, workers: WorkerCount, ctx: &PipelineContext) -> Result<BatchResult> {
    let pool_size = workers.resolve(jobs.len());
    let started_at = Utc::now();
    let start = Instant::now();

    info!("Starting acquisition of {} host(s) with {} worker(s) ({})", jobs.len(), pool_size, workers);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size)
        .thread_name(|i| format!("acquisition-{}", i))
        .build()
        .context("Failed to build worker pool")?;

    // One job per task so a slow host never holds queued hosts behind it
    let outcomes: Vec<HostOutcome> = pool.install(|| {
        jobs.into_par_iter()
            .with_max_len(1)
            .map(|job| run_isolated(&job, ctx))
            .collect()
    });

    let result = BatchResult {
        outcomes,
        workers: pool_size,
        started_at,
        finished_at: Utc::now(),
    };

    info!("Batch finished in {:.1}s: {} succeeded, {} failed",
          start.elapsed().as_secs_f64(), result.succeeded(), result.failed());
    Ok(result)
}

fn run_isolated(job: &JobSpec, ctx: &PipelineContext) -> HostOutcome {
    let start = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| run_pipeline(job, ctx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("{}: pipeline panicked: {}", job.host.address, reason);

            HostOutcome {
                host: job.host.address.clone(),
                success: false,
                error_kind: Some(ErrorKind::Capture),
                error: Some(format!("{}: pipeline panicked: {}", job.host.address, reason)),
                image: None,
                duration_secs: start.elapsed().as_secs_f64(),
            }
        }
    }
}
