//! Authentication error types.

use credential_store::StorageError;
use gql_transport::ServiceFailure;
use thiserror::Error;

/// Authentication error type.
///
/// Cloneable: one refresh outcome is handed to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    /// The backend call failed
    #[error(transparent)]
    Service(#[from] ServiceFailure),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No token to act on, or the session was logged out meanwhile
    #[error("Not logged in")]
    NotLoggedIn,

    /// Invalid state transition in the auth FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// The refresh task ended without producing an outcome
    #[error("Token refresh aborted")]
    RefreshAborted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Service(failure) => failure.is_transient(),
            _ => false,
        }
    }

    /// Returns true if the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AuthError::Service(failure) if failure.is_cancelled())
    }

    /// The underlying transport failure, if any.
    pub fn service_failure(&self) -> Option<&ServiceFailure> {
        match self {
            AuthError::Service(failure) => Some(failure),
            _ => None,
        }
    }

    /// Backend-provided message for GraphQL-level failures.
    pub fn graphql_message(&self) -> Option<&str> {
        match self {
            AuthError::Service(ServiceFailure::GraphQl { message, .. }) => Some(message),
            _ => None,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
