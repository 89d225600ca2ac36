//! GraphQL-over-HTTP transport for the club client.
//!
//! Every request goes through a [`RetryPolicy`] that retries transient
//! failures with exponential backoff, and each attempt is guarded by a shared
//! [`CircuitBreaker`]. Failures are classified into [`ServiceFailure`].
//!
//! ```rust,ignore
//! let transport = GraphQlTransport::new(TransportConfig::from_config(&config)?)?;
//! let data: Value = transport.execute(QUERY, &json!({}), &cancel).await?;
//! ```

mod breaker;
mod clock;
mod envelope;
mod error;
mod pagination;
mod retry;
mod transport;

pub use breaker::{
    AttemptOutcome, BreakerConfig, BreakerPermit, BreakerSnapshot, BreakerState, CircuitBreaker,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::GraphQlRequest;
pub use error::ServiceFailure;
pub use pagination::{paginate_offset, PageCursor, PagedFetcher, PagedQuery};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use transport::{GraphQlTransport, TransportConfig};

pub use tokio_util::sync::CancellationToken;
