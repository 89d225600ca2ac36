//! Secret storage for the club client.
//!
//! Durable storage is supplied by the embedding application through the
//! [`SecureStorage`] trait. [`MemoryStorage`] keeps everything in process and
//! is what tests and store-less embedders use.

mod credentials;
mod keys;
mod memory;
mod traits;

pub use credentials::CredentialStore;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::SecureStorage;

use thiserror::Error;

/// Error type for storage operations.
///
/// Cloneable so it can travel inside shared session outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Platform storage error: {0}")]
    Platform(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
