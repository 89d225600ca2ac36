//! GraphQL-over-HTTP transport.

use crate::envelope::{decode_response, operation_name, GraphQlRequest};
use crate::{BreakerConfig, CircuitBreaker, RetryConfig, RetryPolicy, ServiceFailure};
use club_config::{Config, CoreResult};
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

/// Runtime settings for a [`GraphQlTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: Url,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    /// Non-5xx statuses treated as transient.
    pub handled_statuses: Vec<u16>,
}

impl TransportConfig {
    /// Default settings against `endpoint`.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            handled_statuses: vec![408, 429],
        }
    }

    pub fn from_config(config: &Config) -> CoreResult<Self> {
        Ok(Self {
            endpoint: config.api_url()?,
            timeout: Duration::from_secs(config.api.timeout_secs),
            retry: RetryConfig {
                max_retries: config.retry.max_retries,
                backoff_base: config.retry.backoff_base,
                backoff_unit: Duration::from_millis(config.retry.backoff_unit_ms),
                max_backoff: Duration::from_secs(config.retry.max_backoff_secs),
            },
            breaker: BreakerConfig {
                failure_threshold: config.breaker.failure_threshold,
                break_duration: Duration::from_secs(config.breaker.break_duration_secs),
            },
            handled_statuses: config.api.handled_statuses.clone(),
        })
    }
}

/// Executes GraphQL operations against a single endpoint.
///
/// An authorized transport sends `Authorization: Bearer <token>` once a
/// bearer is set. A bare transport never sends it, whatever is set.
pub struct GraphQlTransport {
    endpoint: Url,
    http: reqwest::Client,
    bearer: RwLock<Option<String>>,
    bare: bool,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    handled_statuses: Vec<u16>,
}

impl GraphQlTransport {
    /// Authorized transport.
    pub fn new(config: TransportConfig) -> Result<Self, ServiceFailure> {
        Self::build(config, false)
    }

    /// Transport that never carries an authorization header.
    pub fn bare(config: TransportConfig) -> Result<Self, ServiceFailure> {
        Self::build(config, true)
    }

    fn build(config: TransportConfig, bare: bool) -> Result<Self, ServiceFailure> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            endpoint: config.endpoint,
            http,
            bearer: RwLock::new(None),
            bare,
            retry: RetryPolicy::new(config.retry),
            breaker: Arc::new(CircuitBreaker::new(config.breaker)),
            handled_statuses: config.handled_statuses,
        })
    }

    /// Use `breaker` instead of the transport's own.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn is_bare(&self) -> bool {
        self.bare
    }

    /// Set or clear the bearer token. Ignored on a bare transport.
    pub fn set_bearer(&self, token: Option<&str>) {
        if self.bare {
            trace!("bare transport ignores bearer");
            return;
        }
        *self.bearer.write() = token.map(str::to_string);
    }

    pub fn has_bearer(&self) -> bool {
        self.bearer.read().is_some()
    }

    /// The token currently sent, if any.
    pub fn bearer(&self) -> Option<String> {
        self.bearer.read().clone()
    }

    /// Execute one operation and decode its `data` into `T`.
    pub async fn execute<T, V>(
        &self,
        query: &str,
        variables: &V,
        cancel: &CancellationToken,
    ) -> Result<T, ServiceFailure>
    where
        T: DeserializeOwned,
        V: Serialize + ?Sized,
    {
        self.execute_with_raw(query, variables, cancel)
            .await
            .map(|(data, _)| data)
    }

    /// Like [`execute`](Self::execute), also returning the exact response
    /// body.
    pub async fn execute_with_raw<T, V>(
        &self,
        query: &str,
        variables: &V,
        cancel: &CancellationToken,
    ) -> Result<(T, String), ServiceFailure>
    where
        T: DeserializeOwned,
        V: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(&GraphQlRequest { query, variables })
            .map_err(|e| ServiceFailure::decode("failed to serialize GraphQL request", e))?;
        let body = body.as_slice();
        let operation = operation_name(query).unwrap_or("anonymous");

        debug!(operation, bare = self.bare, "executing GraphQL operation");
        let result = self
            .retry
            .run(&self.breaker, cancel, move |attempt| {
                self.send_once(operation, body, attempt, cancel)
            })
            .await;

        if let Err(failure) = &result {
            debug!(operation, error = %failure, "GraphQL operation failed");
        }
        result
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        operation: &str,
        body: &[u8],
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<(T, String), ServiceFailure> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(token) = self.bearer().filter(|_| !self.bare) {
            request = request.bearer_auth(token);
        }

        trace!(operation, attempt, "sending request");
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, ServiceFailure>((status, text))
        };

        let (status, text) = tokio::select! {
            _ = cancel.cancelled() => return Err(ServiceFailure::Cancelled),
            exchanged = exchange => exchanged?,
        };

        if !status.is_success() {
            let code = status.as_u16();
            return Err(ServiceFailure::HttpStatus {
                status: code,
                body: text,
                transient: status.is_server_error() || self.handled_statuses.contains(&code),
            });
        }

        let data = decode_response(&text)?;
        Ok((data, text))
    }
}

impl std::fmt::Debug for GraphQlTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQlTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("bare", &self.bare)
            .field("has_bearer", &self.has_bearer())
            .finish_non_exhaustive()
    }
}
