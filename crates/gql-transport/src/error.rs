//! Failure taxonomy for transport operations.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Message used when the backend reported a failure without any text.
pub(crate) const UNKNOWN_ERROR: &str = "unknown error";

/// Every non-success outcome of a transport operation.
///
/// Cloneable so one outcome can be handed to many waiters.
#[derive(Debug, Clone, Error)]
pub enum ServiceFailure {
    /// The HTTP exchange itself failed (connect, timeout, DNS, body read).
    #[error("network error: {message}")]
    Network { message: String },

    /// The server answered with a non-success status.
    #[error("HTTP status {status}: {body}")]
    HttpStatus {
        status: u16,
        /// Response body, kept so error detail is not lost.
        body: String,
        transient: bool,
    },

    /// The response carried GraphQL `errors`. `message` is the first one.
    #[error("{message}")]
    GraphQl {
        message: String,
        messages: Vec<String>,
    },

    /// The response could not be decoded into the expected shape.
    #[error("decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<Arc<serde_json::Error>>,
    },

    /// The circuit breaker rejected the call without touching the network.
    #[error("circuit open until {until}")]
    CircuitOpen { until: DateTime<Utc> },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl ServiceFailure {
    /// Build a `GraphQl` failure from backend messages, falling back to a
    /// generic message when none were supplied.
    pub fn graphql(messages: Vec<String>) -> Self {
        let message = messages
            .iter()
            .find(|m| !m.is_empty())
            .cloned()
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
        Self::GraphQl { message, messages }
    }

    pub(crate) fn decode(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::HttpStatus { transient, .. } => *transient,
            Self::GraphQl { .. }
            | Self::Decode { .. }
            | Self::CircuitOpen { .. }
            | Self::Cancelled => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status code, if the failure carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ServiceFailure {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}
