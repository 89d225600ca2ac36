//! Storage key constants.

/// Keys the club client stores secrets under
pub struct StorageKeys;

impl StorageKeys {
    /// Bearer token (JWT). An empty value means "logged out".
    pub const JWT: &'static str = "jwt";

    /// Person id of the logged-in user
    pub const PERSON_ID: &'static str = "person_id";
}
