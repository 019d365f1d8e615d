//! Turns a raw [`BatchConfig`] into one [`JobSpec`] per host.

use std::str::FromStr;

use log::{debug, info};
use serde_yaml::Value;

use crate::config::batch_config::BatchConfig;
use crate::constants::{AUTO_WORKERS_TOKEN, DEFAULT_WORKER_COUNT};
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::models::{JobSpec, LogDestination, StorageConfig, WorkerCount};

const WORKERS_FORMS: &str = "workers must be an integer or \"auto\"";

/// Build the job list and the worker count for a batch.
///
/// The only failures are malformed global configuration; they are
/// process-fatal and happen before any pipeline starts.
pub fn build_jobs(config: &BatchConfig) -> AcquisitionResult<(Vec<JobSpec>, WorkerCount)> {
    config
        .validate()
        .map_err(|e| AcquisitionError::configuration(format!("{:#}", e)))?;

    let workers = resolve_worker_count(config.workers.as_ref())?;
    let logging = log_destination(config);
    if logging.dir.is_empty() {
        debug!("no logging directory configured, using empty value");
    }
    if logging.prefix.is_empty() {
        debug!("no logging prefix configured, using empty value");
    }

    let global_storage = global_storage(config);
    if global_storage.is_none() {
        info!("no aws section configured, images will be written to local files");
    }

    let jobs = config
        .hosts
        .iter()
        .map(|entry| {
            let host = entry.to_descriptor();
            let storage = match (&host.overrides.bucket, &global_storage) {
                (Some(bucket), Some(global)) => Some(StorageConfig {
                    bucket: Some(bucket.clone()),
                    ..global.clone()
                }),
                (Some(bucket), None) => Some(StorageConfig {
                    bucket: Some(bucket.clone()),
                    ..Default::default()
                }),
                (None, global) => global.clone(),
            };

            JobSpec {
                host,
                logging: logging.clone(),
                storage,
            }
        })
        .collect::<Vec<_>>();

    debug!("built {} job specs with {} workers", jobs.len(), workers);
    Ok((jobs, workers))
}

/// Resolve the logging variables; absent values become empty strings.
pub fn log_destination(config: &BatchConfig) -> LogDestination {
    let section = config.logging.as_ref();
    LogDestination {
        dir: section.and_then(|l| l.dir.clone()).unwrap_or_default(),
        prefix: section.and_then(|l| l.prefix.clone()).unwrap_or_default(),
    }
}

fn global_storage(config: &BatchConfig) -> Option<StorageConfig> {
    config.aws.as_ref().map(|aws| StorageConfig {
        bucket: aws.bucket.clone().filter(|b| !b.is_empty()),
        key: aws.key.clone(),
        secret: aws.secret.clone(),
        region: aws.region.clone(),
    })
}

/// Resolve the configured worker count.
///
/// Absent → 1. Positive integers (or numeric strings) are taken as-is and
/// the literal `auto` passes through; anything else is a configuration error.
pub fn resolve_worker_count(value: Option<&Value>) -> AcquisitionResult<WorkerCount> {
    match value {
        None | Some(Value::Null) => {
            info!("no worker count specified. defaulting to {}", DEFAULT_WORKER_COUNT);
            Ok(WorkerCount::Fixed(DEFAULT_WORKER_COUNT))
        }
        Some(Value::Number(n)) => match n.as_u64() {
            Some(count) if count > 0 => Ok(WorkerCount::Fixed(count as usize)),
            _ => Err(invalid_workers(&n.to_string())),
        },
        Some(Value::String(s)) => s.parse::<WorkerCount>(),
        Some(other) => Err(invalid_workers(&format!("{:?}", other))),
    }
}

fn invalid_workers(raw: &str) -> AcquisitionError {
    info!("invalid worker config '{}', {}", raw, WORKERS_FORMS);
    AcquisitionError::configuration(format!("{} (got '{}')", WORKERS_FORMS, raw))
}

impl FromStr for WorkerCount {
    type Err = AcquisitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token == AUTO_WORKERS_TOKEN {
            return Ok(WorkerCount::Auto);
        }
        match token.parse::<usize>() {
            Ok(count) if count > 0 => Ok(WorkerCount::Fixed(count)),
            _ => Err(invalid_workers(token)),
        }
    }
}
