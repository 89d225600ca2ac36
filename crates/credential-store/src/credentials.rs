//! High-level accessors for the two credentials the session owns.

use crate::{SecureStorage, StorageKeys, StorageResult};
use tracing::debug;

/// Typed view over a [`SecureStorage`] backend.
pub struct CredentialStore {
    storage: Box<dyn SecureStorage>,
}

impl CredentialStore {
    /// Create a credential store over the given storage backend
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Store-less credential store, kept in memory only.
    pub fn in_memory() -> Self {
        Self::new(Box::new(crate::MemoryStorage::new()))
    }

    // ==========================================
    // Bearer token
    // ==========================================

    /// Retrieve the stored token. An empty stored value reads as `None`.
    pub fn token(&self) -> StorageResult<Option<String>> {
        Ok(self
            .storage
            .get(StorageKeys::JWT)?
            .filter(|token| !token.is_empty()))
    }

    /// Persist the token. Logout persists an empty string.
    pub fn set_token(&self, token: &str) -> StorageResult<()> {
        debug!(empty = token.is_empty(), "persisting token");
        self.storage.set(StorageKeys::JWT, token)
    }

    // ==========================================
    // Person id
    // ==========================================

    pub fn person_id(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::PERSON_ID)
    }

    pub fn set_person_id(&self, person_id: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::PERSON_ID, person_id)
    }

    /// Remove the person id, returning whether one was stored
    pub fn clear_person_id(&self) -> StorageResult<bool> {
        self.storage.delete(StorageKeys::PERSON_ID)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}
