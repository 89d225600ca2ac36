//! Configuration, filesystem paths and logging bootstrap for the club client.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    ApiSettings, BreakerSettings, Config, RetrySettings, SessionSettings, DEFAULT_API_URL,
    DEFAULT_LOG_LEVEL, MAX_REFRESH_LEEWAY_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, log_config};
pub use paths::Paths;
