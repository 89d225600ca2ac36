//! Authentication state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!              LoginAttempt                LoginSuccess
//!   NoToken ─────────────────► LoggingIn ─────────────────► Valid
//!      ▲           LoginFailed     │                         │  ▲
//!      ├───────────────────────────┘          RefreshStarted │  │ RefreshSuccess
//!      │                                                     ▼  │
//!      └──────────────── RefreshFailed ────────────────── Refreshing
//!
//!   any state ── LogoutRequested ──► LoggingOut ── LogoutComplete ──► NoToken
//! ```
//!
//! `TokenRestored` moves NoToken to Valid when a stored token is picked up.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub auth_machine(NoToken)

    NoToken => {
        TokenRestored => Valid,
        LoginAttempt => LoggingIn,
        RefreshStarted => Refreshing,
        LogoutRequested => LoggingOut
    },
    LoggingIn => {
        LoginSuccess => Valid,
        LoginFailed => NoToken,
        LogoutRequested => LoggingOut
    },
    Valid => {
        RefreshStarted => Refreshing,
        LoginAttempt => LoggingIn,
        LogoutRequested => LoggingOut
    },
    Refreshing => {
        RefreshSuccess => Valid,
        RefreshFailed => NoToken,
        LogoutRequested => LoggingOut
    },
    LoggingOut => {
        LogoutComplete => NoToken
    }
}

// Re-export the generated types with clearer names
pub use auth_machine::Input as AuthMachineInput;
pub use auth_machine::State as AuthMachineState;
pub use auth_machine::StateMachine as AuthMachine;

/// Authentication state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// No usable token.
    NoToken,
    /// Login request in flight.
    LoggingIn,
    /// Holding a token believed usable.
    Valid,
    /// Refresh request in flight.
    Refreshing,
    /// Clearing the session.
    LoggingOut,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Valid | AuthState::Refreshing)
    }

    /// Returns true if the state is an in-progress state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthState::LoggingIn | AuthState::Refreshing | AuthState::LoggingOut
        )
    }
}

impl From<&AuthMachineState> for AuthState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::NoToken => AuthState::NoToken,
            AuthMachineState::LoggingIn => AuthState::LoggingIn,
            AuthMachineState::Valid => AuthState::Valid,
            AuthMachineState::Refreshing => AuthState::Refreshing,
            AuthMachineState::LoggingOut => AuthState::LoggingOut,
        }
    }
}
