//! Session management for the club client.
//!
//! This crate provides:
//! - Bearer token expiry decoding without signature checks
//! - Login, logout and refresh against the GraphQL backend
//! - Single-flight refresh shared by concurrent callers
//! - Explicit FSM-based auth state tracking

mod auth_fsm;
mod error;
mod operations;
mod session;
mod token_codec;

pub use auth_fsm::auth_machine;
pub use auth_fsm::{AuthMachine, AuthMachineInput, AuthMachineState, AuthState};
pub use error::{AuthError, AuthResult};
pub use session::{SessionConfig, SessionManager};
pub use token_codec::TokenCodec;
