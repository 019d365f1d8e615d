use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::runtime::Runtime;

use lime_collector::acquisition::{run_batch, BatchResult, PipelineContext};
use lime_collector::cli::{Args, Commands};
use lime_collector::cloud::S3ObjectStore;
use lime_collector::config::{build_jobs, log_destination, AwsSection, BatchConfig, RepositorySection};
use lime_collector::constants::SUMMARY_FILENAME;
use lime_collector::logging::init_logging;
use lime_collector::models::LogDestination;
use lime_collector::remote::{ModuleRepository, ReadinessPolicy, SshSettings, SshTransport};
use lime_collector::utils::summary;

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Handle subcommands
    if let Some(cmd) = &args.command {
        init_logging(args.verbose, &LogDestination::default())?;
        return handle_subcommand(cmd);
    }

    // Load configuration and apply command-line overrides
    let config_path = args.config.as_ref()
        .ok_or_else(|| anyhow!("No configuration given. Use -c <FILE> or run init-config first"))?;
    let mut config = BatchConfig::from_yaml_file(config_path)?;
    apply_overrides(&mut config, &args);

    // The logger must exist before the builder logs its defaults
    if let Some(log_path) = init_logging(args.verbose, &log_destination(&config))? {
        info!("Logging to {}", log_path.display());
    }

    info!("Starting memory acquisition from {}", config_path.display());

    // Malformed global configuration is the only fatal condition
    let (jobs, workers) = build_jobs(&config)?;

    fs::create_dir_all(&args.output)
        .context(format!("Failed to create output directory {}", args.output.display()))?;

    let ctx = build_context(&config, &args)?;
    let result = run_batch(jobs, workers, &ctx)?;

    let report_path = args.report.clone()
        .unwrap_or_else(|| args.output.join(SUMMARY_FILENAME));
    write_batch_summary(&result, &report_path)?;

    for line in summary::outcome_lines(&result.outcomes) {
        info!("{}", line);
    }
    if result.failed() > 0 {
        warn!("{} of {} host(s) failed", result.failed(), result.outcomes.len());
    }

    log::logger().flush();
    Ok(())
}

/// Handle subcommands (init-config)
fn handle_subcommand(cmd: &Commands) -> Result<()> {
    match cmd {
        Commands::InitConfig { path } => {
            if path.exists() {
                return Err(anyhow!("{} already exists, refusing to overwrite", path.display()));
            }
            info!("Creating example configuration file at {}", path.display());
            BatchConfig::sample().save_to_yaml_file(path)?;
            Ok(())
        }
    }
}

/// Apply command-line values on top of the configuration file
fn apply_overrides(config: &mut BatchConfig, args: &Args) {
    if let Some(workers) = &args.workers {
        config.workers = Some(serde_yaml::Value::String(workers.clone()));
    }
    if let Some(region) = &args.region {
        config.aws.get_or_insert_with(AwsSection::default).region = Some(region.clone());
    }
    if let Some(path) = &args.repository {
        config.repository = Some(RepositorySection { path: path.clone() });
    }
}

/// Wire the production collaborators shared by every pipeline
fn build_context(config: &BatchConfig, args: &Args) -> Result<PipelineContext> {
    let runtime = Arc::new(Runtime::new().context("Failed to create Tokio runtime")?);
    let region = config.aws.as_ref().and_then(|aws| aws.region.as_deref());

    let mut readiness = ReadinessPolicy::default();
    if let Some(attempts) = args.readiness_attempts {
        readiness.max_attempts = attempts.max(1);
    }
    info!("Readiness wait per host is at most {:?}", readiness.total_wait());

    let repository = config.repository.as_ref().map(|r| ModuleRepository::new(r.path.clone()));
    if let Some(repository) = &repository {
        info!("Using module repository {}", repository.root().display());
    }

    let settings = SshSettings {
        connection_timeout: Duration::from_secs(args.connect_timeout.max(1)),
        readiness,
        repository,
    };

    Ok(PipelineContext {
        transport: Arc::new(SshTransport::new(settings)),
        store: Arc::new(S3ObjectStore::new(runtime, region)),
        output_dir: args.output.clone(),
    })
}

/// Write the batch summary
fn write_batch_summary(result: &BatchResult, path: &Path) -> Result<()> {
    let summary_json = summary::create_batch_summary(
        &result.outcomes,
        result.workers,
        result.started_at,
        result.finished_at,
    )?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .context(format!("Failed to create report directory {}", parent.display()))?;
    }
    fs::write(path, &summary_json)
        .context("Failed to write batch summary")?;

    info!("Batch summary written to {}", path.display());
    Ok(())
}
