//! Configuration management for the club client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default GraphQL endpoint (can be overridden at compile time via CLUB_API_URL env var).
pub const DEFAULT_API_URL: &str = match option_env!("CLUB_API_URL") {
    Some(url) => url,
    None => "https://api.example.com/graphql",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Largest accepted refresh leeway, one day.
pub const MAX_REFRESH_LEEWAY_SECS: u64 = 86_400;

/// Main client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub session: SessionSettings,
    /// Rows requested per page by paged queries.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// GraphQL endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_api_url")]
    pub url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Non-5xx HTTP statuses that are still treated as transient.
    #[serde(default = "default_handled_statuses")]
    pub handled_statuses: Vec<u16>,
}

/// Retry settings for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive transient failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before admitting a probe.
    #[serde(default = "default_break_duration_secs")]
    pub break_duration_secs: u64,
}

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Refresh this many seconds before the token actually expires.
    #[serde(default)]
    pub refresh_leeway_secs: u64,
    /// Whether a transient refresh failure is retried before giving up.
    #[serde(default = "default_true")]
    pub retry_refresh: bool,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_handled_statuses() -> Vec<u16> {
    vec![408, 429]
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_max_backoff_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_break_duration_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            handled_statuses: default_handled_statuses(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_unit_ms: default_backoff_unit_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            break_duration_secs: default_break_duration_secs(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_leeway_secs: 0,
            retry_refresh: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api: ApiSettings::default(),
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            session: SessionSettings::default(),
            page_size: default_page_size(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from `config.json` under `paths`, falling back to
    /// defaults, then apply environment overrides and validate.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(log_level) = lookup("CLUB_LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.log_level = log_level;
        }
        if let Some(url) = lookup("CLUB_API_URL").filter(|v| !v.is_empty()) {
            self.api.url = url;
        }
    }

    /// Check the values that would otherwise fail later at runtime.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_url()?;
        if self.breaker.failure_threshold == 0 {
            return Err(CoreError::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.session.refresh_leeway_secs > MAX_REFRESH_LEEWAY_SECS {
            return Err(CoreError::Config(format!(
                "session.refresh_leeway_secs must be at most {MAX_REFRESH_LEEWAY_SECS}"
            )));
        }
        if self.page_size == 0 {
            return Err(CoreError::Config(
                "page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the GraphQL endpoint as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api.url).map_err(CoreError::from)
    }
}
