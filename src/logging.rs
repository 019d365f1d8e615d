//! Process-wide logger initialisation.
//!
//! The logger is installed once, before any pipeline starts, and is shared by
//! every worker through the `log` facade.

use std::fs::{self, File};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};

use crate::models::LogDestination;

/// Path of the log file for `destination`, or `None` for terminal-only logging.
///
/// The file is `<dir>/<prefix>memory-capture-<timestamp>.log`; an empty
/// directory means the current directory.
pub fn log_file_path(destination: &LogDestination, timestamp: &str) -> Option<PathBuf> {
    if !destination.writes_file() {
        return None;
    }
    let filename = format!("{}memory-capture-{}.log", destination.prefix, timestamp);
    Some(PathBuf::from(&destination.dir).join(filename))
}

/// Initialize logging with the specified verbosity level.
///
/// Returns the log file path when a file logger was installed.
pub fn init_logging(verbose: bool, destination: &LogDestination) -> Result<Option<PathBuf>> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
    let log_path = log_file_path(destination, &timestamp);

    if let Some(path) = &log_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .context(format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = File::create(path)
            .context(format!("Failed to create log file {}", path.display()))?;
        loggers.push(WriteLogger::new(log_level, Config::default(), file));
    }

    CombinedLogger::init(loggers).context("Failed to initialize logger")?;
    Ok(log_path)
}
