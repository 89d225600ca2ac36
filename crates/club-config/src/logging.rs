//! Logging initialization for the club client.
//!
//! Maps the client [`Config`] onto the observability crate's [`LogConfig`].
//! Events are written as JSONL to `~/.club/logs/club.jsonl`.

use crate::{Config, Paths};
use observability::{InitError, LogConfig};
use std::path::PathBuf;

const SERVICE_NAME: &str = "club-client";

/// Build the [`LogConfig`] for the given client configuration.
///
/// `CLUB_LOG_STDERR=1` (or `true`) mirrors events to stderr.
pub fn log_config(config: &Config, paths: &Paths) -> LogConfig {
    let also_stderr = std::env::var("CLUB_LOG_STDERR")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: config.log_level.clone(),
        log_path: Some(paths.log_file()),
        also_stderr,
    }
}

/// Initialize the logging system.
///
/// Returns the log file path. A second call leaves the first subscriber in
/// place and reports [`InitError::AlreadyInitialized`].
pub fn init_logging(config: &Config, paths: &Paths) -> Result<PathBuf, InitError> {
    observability::init_with_config(log_config(config, paths))
}
