//! # Observability
//!
//! Centralized tracing setup for the club client libraries.
//!
//! Library crates are **log producers** only. They use the standard `tracing`
//! macros and never install a subscriber themselves. The embedding
//! application calls [`init`] or [`init_with_config`] once at startup.
//!
//! Every event is written as one JSON object per line to an append-only file
//! (`~/.club/logs/club.jsonl` by default), which can be followed with
//! `tail -f ~/.club/logs/club.jsonl | jq`.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "club-client".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//! tracing::info!("session restored");
//! ```

mod file_sink;
mod json_layer;

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_sink::{FileLogWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info,gql_transport=trace").
    /// Overridden by `RUST_LOG` when set.
    pub default_level: String,

    /// Log file path. Defaults to `~/.club/logs/club.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact human-readable logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    /// The log file could not be opened.
    #[error("failed to open log file: {0}")]
    Io(#[from] io::Error),

    /// No home directory to place the default log file in.
    #[error("could not determine home directory")]
    NoHomeDir,

    /// A global subscriber was already installed.
    #[error("a global subscriber is already set")]
    AlreadyInitialized,
}

/// Default log file location, `~/.club/logs/club.jsonl`.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".club").join("logs").join("club.jsonl"))
}

/// Initialize with default settings for the named service.
pub fn init(service_name: &str) -> Result<PathBuf, InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize the global subscriber.
///
/// Returns the path of the JSONL file logs are written to. Calling this a
/// second time returns [`InitError::AlreadyInitialized`] and leaves the first
/// subscriber in place.
pub fn init_with_config(config: LogConfig) -> Result<PathBuf, InitError> {
    let log_path = match config.log_path.clone() {
        Some(path) => path,
        None => default_log_path().ok_or(InitError::NoHomeDir)?,
    };

    let writer = FileLogWriter::new(&log_path)?;
    let json_layer = JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer));

    let stderr_layer = if config.also_stderr {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .compact()
                .with_writer(io::stderr)
                .with_filter(env_filter(&config.default_level)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init()
        .map_err(|_| InitError::AlreadyInitialized)?;

    tracing::info!(
        service = %config.service_name,
        log_path = %log_path.display(),
        "observability initialized"
    );

    Ok(log_path)
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub use tracing::{debug, error, info, instrument, trace, warn};
