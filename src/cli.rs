use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for lime-collector.
///
/// Batch settings come from the YAML configuration; the options here
/// override individual values of that file for a single run.
#[derive(Parser, Debug)]
#[clap(name = "lime-collector", about = "Remote memory acquisition across a fleet of hosts")]
pub struct Args {
    /// Path to the batch configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Directory for images that are not sent to object storage
    #[clap(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Worker count override (integer or "auto")
    #[clap(short, long)]
    pub workers: Option<String>,

    /// AWS region for the image bucket
    #[clap(long)]
    pub region: Option<String>,

    /// Local directory of prebuilt modules, searched by kernel version
    #[clap(long)]
    pub repository: Option<PathBuf>,

    /// Path of the JSON batch report (default: <output>/acquisition_summary.json)
    #[clap(long)]
    pub report: Option<PathBuf>,

    /// Readiness polls per host before the module is declared failed
    #[clap(long)]
    pub readiness_attempts: Option<u32>,

    /// SSH connection timeout in seconds
    #[clap(long, default_value = "30")]
    pub connect_timeout: u64,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,

    /// Subcommands
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands for the collector.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example batch configuration file
    InitConfig {
        /// Path to output configuration file
        #[clap(default_value = "fleet.yaml")]
        path: PathBuf,
    },
}
