//! Session management with single-flight token refresh.
//!
//! The `SessionManager` owns the bearer token, its decoded expiry and the
//! resolved person id. Token and expiry always change together under one
//! lock, and the authorized transport's bearer is updated inside that same
//! critical section, so no caller sees a header that differs from the
//! current session.
//!
//! Refresh goes through the bare transport, which never carries an
//! authorization header. At most one refresh request is in flight: the first
//! caller spawns it and every concurrent caller awaits the same outcome.
//! Cancelling one caller detaches only that caller; the request keeps
//! running for the others.

use crate::auth_fsm::{AuthMachine, AuthMachineInput, AuthState};
use crate::operations::{
    CurrentPersonData, LoginData, LoginVariables, NoVariables, RefreshData, RefreshVariables,
    CURRENT_PERSON, LOGIN, REFRESH_JWT,
};
use crate::{AuthError, AuthResult, TokenCodec};
use chrono::{DateTime, Utc};
use club_config::Config;
use credential_store::CredentialStore;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use gql_transport::{
    CancellationToken, Clock, GraphQlTransport, RetryConfig, ServiceFailure, SystemClock,
    TransportConfig,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Refresh this long before the token's expiry.
    pub refresh_leeway: Duration,
    /// Retry a transient refresh failure before logging out.
    pub retry_refresh: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_leeway: Duration::ZERO,
            retry_refresh: true,
        }
    }
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            refresh_leeway: Duration::from_secs(config.session.refresh_leeway_secs),
            retry_refresh: config.session.retry_refresh,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    person_id: Option<String>,
    /// Bumped by login and logout. A refresh started under an older
    /// generation must not touch the session.
    generation: u64,
    /// Set once the store has been read, or a login or logout replaced its
    /// contents. From then on memory is the source of truth, even if a
    /// store write failed.
    memory_authoritative: bool,
}

type RefreshFlight = Shared<BoxFuture<'static, AuthResult<String>>>;

struct SessionInner {
    store: CredentialStore,
    authorized: Arc<GraphQlTransport>,
    bare: Arc<GraphQlTransport>,
    clock: Arc<dyn Clock>,
    refresh_leeway: chrono::Duration,
    state: Mutex<SessionState>,
    fsm: Mutex<AuthMachine>,
    refresh_flight: Mutex<Option<RefreshFlight>>,
}

/// Session manager for the bearer token. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a session manager over an authorized and a bare transport.
    pub fn new(
        store: CredentialStore,
        authorized: Arc<GraphQlTransport>,
        bare: Arc<GraphQlTransport>,
        config: SessionConfig,
    ) -> Self {
        Self::with_clock(store, authorized, bare, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: CredentialStore,
        authorized: Arc<GraphQlTransport>,
        bare: Arc<GraphQlTransport>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if !bare.is_bare() {
            warn!("refresh transport is not bare; it may carry an authorization header");
        }
        let refresh_leeway =
            chrono::Duration::from_std(config.refresh_leeway).unwrap_or_else(|_| {
                warn!("refresh leeway out of range, every token will be refreshed");
                chrono::Duration::MAX
            });

        Self {
            inner: Arc::new(SessionInner {
                store,
                authorized,
                bare,
                clock,
                refresh_leeway,
                state: Mutex::new(SessionState::default()),
                fsm: Mutex::new(AuthMachine::new()),
                refresh_flight: Mutex::new(None),
            }),
        }
    }

    /// Build both transports from the client configuration. They share one
    /// circuit breaker.
    pub fn from_config(config: &Config, store: CredentialStore) -> AuthResult<Self> {
        let transport_config =
            TransportConfig::from_config(config).map_err(|e| AuthError::Config(e.to_string()))?;
        let session_config = SessionConfig::from_config(config);

        let mut bare_config = transport_config.clone();
        if !session_config.retry_refresh {
            bare_config.retry = RetryConfig::disabled();
        }

        let authorized = GraphQlTransport::new(transport_config)?;
        let bare = GraphQlTransport::bare(bare_config)?.with_breaker(authorized.breaker().clone());

        Ok(Self::new(
            store,
            Arc::new(authorized),
            Arc::new(bare),
            session_config,
        ))
    }

    /// Log in and adopt the returned token.
    ///
    /// A response without a usable token fails with a GraphQL-class
    /// [`ServiceFailure`](gql_transport::ServiceFailure). The person id is
    /// resolved afterwards on a best-effort basis.
    ///
    /// Cancelling before the login response arrives fails with
    /// `ServiceFailure::Cancelled` and leaves the previous session in place.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> AuthResult<String> {
        let inner = &self.inner;
        inner.transition(AuthMachineInput::LoginAttempt);
        info!("logging in");

        let variables = LoginVariables {
            login: username,
            passwd: password,
        };
        let outcome = inner
            .bare
            .execute::<Option<LoginData>, _>(LOGIN, &variables, cancel)
            .await
            .and_then(LoginData::jwt)
            .map_err(AuthError::from)
            .and_then(|token| inner.start_session(&token).map(|generation| (token, generation)));

        let (token, generation) = match outcome {
            Ok(started) => started,
            Err(e) => {
                warn!(error = %e, "login failed");
                inner.transition(AuthMachineInput::LoginFailed);
                if inner.state.lock().token.is_some() {
                    inner.transition(AuthMachineInput::TokenRestored);
                }
                return Err(e);
            }
        };

        inner.transition(AuthMachineInput::LoginSuccess);
        info!("logged in");

        inner.resolve_person_id(generation, cancel).await;
        Ok(token)
    }

    /// Clear the session. Never fails; backing-store errors are logged.
    pub fn logout(&self) {
        let inner = &self.inner;
        inner.transition(AuthMachineInput::LogoutRequested);
        {
            let mut state = inner.state.lock();
            state.token = None;
            state.expires_at = None;
            state.person_id = None;
            state.generation += 1;
            state.memory_authoritative = true;
            inner.authorized.set_bearer(None);

            if let Err(e) = inner.store.set_token("") {
                warn!(error = %e, "failed to persist logout");
            }
            if let Err(e) = inner.store.clear_person_id() {
                warn!(error = %e, "failed to clear person id");
            }
        }
        inner.transition(AuthMachineInput::LogoutComplete);
        info!("logged out");
    }

    /// True iff a non-empty token is held in memory or in the store.
    pub fn has_token(&self) -> bool {
        match self.inner.load_token() {
            Ok(token) => token.is_some(),
            Err(e) => {
                warn!(error = %e, "could not read stored token");
                false
            }
        }
    }

    /// Make sure the authorized transport carries a usable token.
    ///
    /// Returns true without any network call while the token's expiry is in
    /// the future or unknown. Otherwise refreshes; a failed refresh logs out
    /// and returns false. A cancelled caller also gets false, but the session
    /// is left to the outcome of the shared refresh.
    pub async fn try_refresh_if_needed(&self, cancel: &CancellationToken) -> bool {
        let stale = match self.inner.load_token() {
            Ok(Some(token)) => token,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "could not read stored token");
                return false;
            }
        };

        if self.inner.adopt_if_fresh().is_some() {
            return true;
        }

        match self.refresh(Some(stale), cancel).await {
            Ok(_) => true,
            Err(e) if e.is_cancelled() => {
                debug!("caller stopped waiting for refresh");
                false
            }
            Err(e) => {
                debug!(error = %e, "refresh did not produce a usable token");
                false
            }
        }
    }

    /// Refresh now and return the new token. A failure logs out and is
    /// returned to the caller; cancellation is returned without logging out.
    pub async fn refresh_jwt(&self, cancel: &CancellationToken) -> AuthResult<String> {
        if self.inner.load_token()?.is_none() {
            return Err(AuthError::NotLoggedIn);
        }
        self.refresh(None, cancel).await
    }

    /// Current token, if any.
    pub fn token(&self) -> Option<String> {
        self.inner.load_token().ok().flatten()
    }

    /// Expiry of the current token; `None` when absent or unknown.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().expires_at
    }

    pub fn person_id(&self) -> Option<String> {
        if let Err(e) = self.inner.load_token() {
            warn!(error = %e, "could not read stored token");
        }
        self.inner.state.lock().person_id.clone()
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState::from(self.inner.fsm.lock().state())
    }

    /// The authorized transport for application queries.
    pub fn transport(&self) -> Arc<GraphQlTransport> {
        self.inner.authorized.clone()
    }

    /// Join the in-flight refresh or start one.
    ///
    /// `stale` is the token the caller found expired. If the session has
    /// already moved past it by the time no refresh is in flight, the
    /// current token is returned without another request.
    async fn refresh(
        &self,
        stale: Option<String>,
        cancel: &CancellationToken,
    ) -> AuthResult<String> {
        if cancel.is_cancelled() {
            return Err(ServiceFailure::Cancelled.into());
        }

        let flight = {
            let mut slot = self.inner.refresh_flight.lock();
            match slot.as_ref() {
                Some(flight) => {
                    debug!("joining in-flight refresh");
                    flight.clone()
                }
                None => {
                    if stale.is_some() {
                        if let Some(current) = self.inner.adopt_if_fresh() {
                            if Some(&current) != stale.as_ref() {
                                return Ok(current);
                            }
                        }
                    }
                    let flight = self.inner.clone().spawn_refresh();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ServiceFailure::Cancelled.into()),
            outcome = flight => outcome,
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("auth_state", &self.auth_state())
            .field("expires_at", &self.expires_at())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    /// Transition the FSM, logging and ignoring impossible inputs.
    fn transition(&self, input: AuthMachineInput) -> AuthState {
        self.try_transition(input).unwrap_or_else(|e| {
            debug!(error = %e, "ignoring auth transition");
            AuthState::from(self.fsm.lock().state())
        })
    }

    fn try_transition(&self, input: AuthMachineInput) -> AuthResult<AuthState> {
        let mut fsm = self.fsm.lock();
        let old_state = AuthState::from(fsm.state());

        fsm.consume(&input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input, old_state
            ))
        })?;

        let new_state = AuthState::from(fsm.state());
        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Auth state transition"
            );
        }
        Ok(new_state)
    }

    fn is_expired(&self, expires_at: Option<DateTime<Utc>>) -> bool {
        TokenCodec::needs_refresh(expires_at, self.clock.now(), self.refresh_leeway)
    }

    /// Token from memory, falling back to the store. A stored token is
    /// adopted into memory unless a login or logout happened meanwhile.
    fn load_token(&self) -> AuthResult<Option<String>> {
        let generation = {
            let state = self.state.lock();
            if state.token.is_some() || state.memory_authoritative {
                return Ok(state.token.clone());
            }
            state.generation
        };

        let stored = self.store.token()?;
        let person_id = match stored {
            Some(_) => self.store.person_id().unwrap_or_default(),
            None => None,
        };

        {
            let mut state = self.state.lock();
            if state.generation != generation || state.memory_authoritative {
                return Ok(state.token.clone());
            }
            state.memory_authoritative = true;
            let Some(stored) = stored else {
                return Ok(None);
            };
            state.expires_at = TokenCodec::expires_at(&stored);
            state.token = Some(stored);
            state.person_id = person_id;
        }

        debug!("restored token from credential store");
        self.transition(AuthMachineInput::TokenRestored);
        Ok(self.state.lock().token.clone())
    }

    /// If the held token is not expired, put it on the authorized transport
    /// and return it.
    fn adopt_if_fresh(&self) -> Option<String> {
        let state = self.state.lock();
        let token = state.token.as_ref()?;
        if self.is_expired(state.expires_at) {
            return None;
        }
        self.authorized.set_bearer(Some(token));
        Some(token.clone())
    }

    /// Persist and adopt a freshly issued login token, starting a new
    /// generation.
    fn start_session(&self, token: &str) -> AuthResult<u64> {
        let mut state = self.state.lock();
        self.store.set_token(token)?;
        if let Err(e) = self.store.clear_person_id() {
            warn!(error = %e, "failed to clear previous person id");
        }

        state.generation += 1;
        state.memory_authoritative = true;
        state.token = Some(token.to_string());
        state.expires_at = TokenCodec::expires_at(token);
        state.person_id = None;
        self.authorized.set_bearer(Some(token));
        Ok(state.generation)
    }

    async fn resolve_person_id(&self, generation: u64, cancel: &CancellationToken) {
        let person_id = match self
            .authorized
            .execute::<Option<CurrentPersonData>, _>(CURRENT_PERSON, &NoVariables {}, cancel)
            .await
        {
            Ok(data) => data.and_then(CurrentPersonData::into_person_id),
            Err(e) => {
                warn!(error = %e, "could not resolve person id");
                return;
            }
        };

        let Some(person_id) = person_id else {
            warn!("current person has no id");
            return;
        };

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!("session changed while resolving person id");
            return;
        }
        if let Err(e) = self.store.set_person_id(&person_id) {
            warn!(error = %e, "failed to persist person id");
        }
        debug!(person_id = %person_id, "resolved person id");
        state.person_id = Some(person_id);
    }

    /// Spawn the refresh task and wrap its handle as a shareable future.
    fn spawn_refresh(self: Arc<Self>) -> RefreshFlight {
        let task = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = task.run_refresh().await;
            *task.refresh_flight.lock() = None;
            outcome
        });

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "refresh task did not complete");
                    *self.refresh_flight.lock() = None;
                    Err(AuthError::RefreshAborted)
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_refresh(&self) -> AuthResult<String> {
        let (stale, generation) = {
            let state = self.state.lock();
            (state.token.clone(), state.generation)
        };
        let Some(stale) = stale else {
            return Err(AuthError::NotLoggedIn);
        };

        self.transition(AuthMachineInput::RefreshStarted);
        info!("refreshing token");

        // Every waiter shares this request, so it never takes a caller's token
        let cancel = CancellationToken::new();
        let outcome = self
            .bare
            .execute::<Option<RefreshData>, _>(
                REFRESH_JWT,
                &RefreshVariables { jwt: &stale },
                &cancel,
            )
            .await
            .and_then(RefreshData::jwt);

        match outcome {
            Ok(token) => self.finish_refresh(&token, generation),
            Err(failure) => {
                warn!(error = %failure, "token refresh failed, logging out");
                self.abandon_session(generation);
                Err(failure.into())
            }
        }
    }

    fn finish_refresh(&self, token: &str, generation: u64) -> AuthResult<String> {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!("session changed during refresh, discarding new token");
                return state.token.clone().ok_or(AuthError::NotLoggedIn);
            }

            if let Err(e) = self.store.set_token(token) {
                warn!(error = %e, "failed to persist refreshed token");
            }
            state.token = Some(token.to_string());
            state.expires_at = TokenCodec::expires_at(token);
            self.authorized.set_bearer(Some(token));
        }

        self.transition(AuthMachineInput::RefreshSuccess);
        info!("token refreshed");
        Ok(token.to_string())
    }

    /// Log out after a failed refresh, unless the session already changed.
    fn abandon_session(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.token = None;
            state.expires_at = None;
            state.person_id = None;
            state.generation += 1;
            state.memory_authoritative = true;
            self.authorized.set_bearer(None);

            if let Err(e) = self.store.set_token("") {
                warn!(error = %e, "failed to persist logout");
            }
            if let Err(e) = self.store.clear_person_id() {
                warn!(error = %e, "failed to clear person id");
            }
        }
        self.transition(AuthMachineInput::RefreshFailed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credential_store::{MemoryStorage, StorageKeys};
    use gql_transport::ManualClock;

    fn transports() -> (Arc<GraphQlTransport>, Arc<GraphQlTransport>) {
        let config = TransportConfig::new("http://127.0.0.1:9/graphql".parse().unwrap());
        (
            Arc::new(GraphQlTransport::new(config.clone()).unwrap()),
            Arc::new(GraphQlTransport::bare(config).unwrap()),
        )
    }

    fn manager_with(storage: MemoryStorage) -> SessionManager {
        let (authorized, bare) = transports();
        SessionManager::new(
            CredentialStore::new(Box::new(storage)),
            authorized,
            bare,
            SessionConfig::default(),
        )
    }

    #[test]
    fn test_initial_state() {
        let manager = manager_with(MemoryStorage::new());
        assert_eq!(manager.auth_state(), AuthState::NoToken);
        assert!(!manager.has_token());
        assert_eq!(manager.token(), None);
        assert_eq!(manager.person_id(), None);
    }

    #[test]
    fn test_restores_stored_session() {
        let storage = MemoryStorage::new()
            .with_entry(StorageKeys::JWT, "opaque")
            .with_entry(StorageKeys::PERSON_ID, "p-3");
        let manager = manager_with(storage);

        assert!(manager.has_token());
        assert_eq!(manager.auth_state(), AuthState::Valid);
        assert_eq!(manager.token().as_deref(), Some("opaque"));
        assert_eq!(manager.person_id().as_deref(), Some("p-3"));
        assert_eq!(manager.expires_at(), None);
    }

    #[test]
    fn test_empty_stored_token_is_no_token() {
        let manager = manager_with(MemoryStorage::new().with_entry(StorageKeys::JWT, ""));
        assert!(!manager.has_token());
    }

    #[test]
    fn test_logout_clears_everything() {
        let storage = MemoryStorage::new()
            .with_entry(StorageKeys::JWT, "opaque")
            .with_entry(StorageKeys::PERSON_ID, "p-3");
        let manager = manager_with(storage);
        assert!(manager.has_token());
        manager.transport().set_bearer(Some("opaque"));

        manager.logout();

        assert!(!manager.has_token());
        assert_eq!(manager.person_id(), None);
        assert!(!manager.transport().has_bearer());
        assert_eq!(manager.auth_state(), AuthState::NoToken);

        // Logging out twice is harmless
        manager.logout();
        assert_eq!(manager.auth_state(), AuthState::NoToken);
    }

    #[test]
    fn test_leeway_counts_toward_expiry() {
        let (authorized, bare) = transports();
        let clock = Arc::new(ManualClock::default());
        let manager = SessionManager::with_clock(
            CredentialStore::in_memory(),
            authorized,
            bare,
            SessionConfig {
                refresh_leeway: Duration::from_secs(60),
                retry_refresh: true,
            },
            clock.clone(),
        );

        let soon = clock.now() + chrono::Duration::seconds(30);
        let later = clock.now() + chrono::Duration::seconds(120);
        assert!(manager.inner.is_expired(Some(soon)));
        assert!(!manager.inner.is_expired(Some(later)));
        assert!(!manager.inner.is_expired(None));
    }

    #[test]
    fn test_oversized_leeway_does_not_panic() {
        let (authorized, bare) = transports();
        let manager = SessionManager::new(
            CredentialStore::in_memory(),
            authorized,
            bare,
            SessionConfig {
                refresh_leeway: Duration::from_secs(10_000_000_000_000),
                retry_refresh: true,
            },
        );

        assert!(manager.inner.is_expired(DateTime::from_timestamp(4_000_000_000, 0)));
        assert!(!manager.inner.is_expired(None));
    }

    #[test]
    fn test_session_config_from_config() {
        let mut config = Config::default();
        config.session.refresh_leeway_secs = 45;
        config.session.retry_refresh = false;

        let session = SessionConfig::from_config(&config);
        assert_eq!(session.refresh_leeway, Duration::from_secs(45));
        assert!(!session.retry_refresh);
    }

    #[test]
    fn test_from_config_rejects_bad_url() {
        let mut config = Config::default();
        config.api.url = "not a url".to_string();
        let result = SessionManager::from_config(&config, CredentialStore::in_memory());
        assert!(matches!(result, Err(AuthError::Config(_))));
    }
}
