//! Circuit breaker shared by every attempt a transport makes.
//!
//! ## State Diagram
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────► Open
//!     ▲                                │ break duration elapsed
//!     │ probe succeeded                ▼
//!     └──────────────────────────── HalfOpen ──► Open (probe failed)
//! ```
//!
//! Only transient failures count. The Open to HalfOpen move happens lazily,
//! when the first call after the break duration asks for a permit; that
//! call becomes the single probe. A success reported by a permit issued
//! before the trip closes the circuit from any state.

use crate::{Clock, ServiceFailure, SystemClock};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_fsm::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub circuit(Closed)

    Closed => {
        Tripped => Open
    },
    Open => {
        CooldownElapsed => HalfOpen,
        Recovered => Closed
    },
    HalfOpen => {
        ProbeSucceeded => Closed,
        ProbeFailed => Open,
        Recovered => Closed
    }
}

use circuit::Input as CircuitInput;
use circuit::State as CircuitState;
use circuit::StateMachine as CircuitMachine;

/// Breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is admitted.
    pub break_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// Public view of the breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: DateTime<Utc> },
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

/// What happened to the attempt a permit was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure { transient: bool },
    Cancelled,
}

impl AttemptOutcome {
    pub fn of<T>(result: &Result<T, ServiceFailure>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(failure) if failure.is_cancelled() => Self::Cancelled,
            Err(failure) => Self::Failure {
                transient: failure.is_transient(),
            },
        }
    }
}

struct BreakerInner {
    machine: CircuitMachine,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    /// Bumped on every move to HalfOpen. A probe permit only owns the slot
    /// of the half-open period it was issued in.
    half_open_epoch: u64,
}

impl BreakerInner {
    fn transition(&mut self, input: CircuitInput) {
        let from = *self.machine.state();
        if self.machine.consume(&input).is_err() {
            debug!(?from, ?input, "ignoring impossible circuit transition");
        }
    }

    fn owns_probe_slot(&self, epoch: Option<u64>) -> bool {
        *self.machine.state() == CircuitState::HalfOpen && epoch == Some(self.half_open_epoch)
    }

    fn close(&mut self, input: CircuitInput) {
        self.transition(input);
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        self.opened_at = None;
    }
}

/// Consecutive-failure circuit breaker.
pub struct CircuitBreaker {
    config: BreakerConfig,
    break_duration: chrono::Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let break_duration = chrono::Duration::from_std(config.break_duration)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            config,
            break_duration,
            clock,
            inner: Mutex::new(BreakerInner {
                machine: CircuitMachine::new(),
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                half_open_epoch: 0,
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Ask to make one attempt.
    ///
    /// Fails with [`ServiceFailure::CircuitOpen`] while the circuit is open,
    /// and while a half-open probe is already in flight.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, ServiceFailure> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match *inner.machine.state() {
            CircuitState::Closed => Ok(self.permit(None)),
            CircuitState::Open => {
                let until = self.open_until(&inner, now);
                if now < until {
                    return Err(ServiceFailure::CircuitOpen { until });
                }
                inner.transition(CircuitInput::CooldownElapsed);
                inner.half_open_epoch += 1;
                inner.probe_in_flight = true;
                info!("circuit half-open, admitting probe");
                Ok(self.permit(Some(inner.half_open_epoch)))
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(ServiceFailure::CircuitOpen { until: now });
                }
                inner.probe_in_flight = true;
                Ok(self.permit(Some(inner.half_open_epoch)))
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.snapshot().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let state = match *inner.machine.state() {
            CircuitState::Closed => BreakerState::Closed,
            CircuitState::Open => BreakerState::Open {
                until: self.open_until(&inner, now),
            },
            CircuitState::HalfOpen => BreakerState::HalfOpen,
        };
        BreakerSnapshot {
            state,
            consecutive_failures: inner.consecutive_failures,
        }
    }

    fn permit(&self, probe_epoch: Option<u64>) -> BreakerPermit<'_> {
        BreakerPermit {
            breaker: self,
            probe_epoch,
            settled: false,
        }
    }

    fn open_until(&self, inner: &BreakerInner, now: DateTime<Utc>) -> DateTime<Utc> {
        let opened_at = inner.opened_at.unwrap_or(now);
        opened_at
            .checked_add_signed(self.break_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn record(&self, probe_epoch: Option<u64>, outcome: AttemptOutcome) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let state = *inner.machine.state();
        let probe = inner.owns_probe_slot(probe_epoch);

        match outcome {
            AttemptOutcome::Success => match state {
                CircuitState::Closed => inner.consecutive_failures = 0,
                CircuitState::HalfOpen if probe => {
                    inner.close(CircuitInput::ProbeSucceeded);
                    info!("probe succeeded, circuit closed");
                }
                CircuitState::Open | CircuitState::HalfOpen => {
                    inner.close(CircuitInput::Recovered);
                    info!("late success, circuit closed");
                }
            },
            AttemptOutcome::Failure { transient: true } => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                match state {
                    CircuitState::Closed
                        if inner.consecutive_failures >= self.config.failure_threshold =>
                    {
                        inner.transition(CircuitInput::Tripped);
                        inner.opened_at = Some(now);
                        warn!(
                            failures = inner.consecutive_failures,
                            break_secs = self.config.break_duration.as_secs(),
                            "circuit opened"
                        );
                    }
                    CircuitState::HalfOpen if probe => {
                        inner.transition(CircuitInput::ProbeFailed);
                        inner.probe_in_flight = false;
                        inner.opened_at = Some(now);
                        warn!("probe failed, circuit re-opened");
                    }
                    _ => {}
                }
            }
            AttemptOutcome::Failure { transient: false } | AttemptOutcome::Cancelled => {
                if probe {
                    inner.probe_in_flight = false;
                }
            }
        }
    }

    fn release_probe(&self, probe_epoch: Option<u64>) {
        let mut inner = self.inner.lock();
        if inner.owns_probe_slot(probe_epoch) {
            inner.probe_in_flight = false;
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Admission for a single attempt. Report the outcome with [`record`].
///
/// Dropping a permit without recording frees a half-open probe slot and
/// leaves the state unchanged.
///
/// [`record`]: BreakerPermit::record
#[must_use = "record the attempt outcome on the permit"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe_epoch: Option<u64>,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this permit is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe_epoch.is_some()
    }

    pub fn record(mut self, outcome: AttemptOutcome) {
        self.settled = true;
        self.breaker.record(self.probe_epoch, outcome);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe_epoch.is_some() {
            self.breaker.release_probe(self.probe_epoch);
        }
    }
}
