//! Circuit breaker guarding the inference dependency.
//!
//! The breaker is a pure state advisor: it never performs or fails a call
//! itself. Callers ask [`CircuitBreaker::allow`] (or take a [`Permit`]) before
//! each attempt and report the outcome afterwards. One breaker is shared by
//! every project, so all transitions happen under a single lock.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │ now >= opened_at + open_duration
//!     │ trial succeeds                 ▼ (allow() admits one trial)
//!     └──────────────────────────── HalfOpen ──trial fails──▶ Open
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Time source
// ---------------------------------------------------------------------------

/// Monotonic time source; swapped for [`ManualClock`] in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call.
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Failure-isolation state machine for one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Whether a call may proceed now.
    ///
    /// An open breaker whose `open_duration` has elapsed moves to half-open
    /// and admits exactly one trial; further calls are refused until that
    /// trial's outcome is reported.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner.opened_at.is_none_or(|at| self.window_elapsed(at));
                if elapsed {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.trial_in_flight = true;
                }
                elapsed
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Like [`allow`](Self::allow), but returns a guard that reports the outcome.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.allow().then_some(Permit {
            breaker: self,
            settled: false,
        })
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                self.transition(&mut inner, BreakerState::Closed);
            }
            // A call admitted before the breaker opened; the open window stands.
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trips = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            BreakerState::Open => false,
        };
        if trips {
            inner.opened_at = Some(self.clock.now());
            inner.trial_in_flight = false;
            self.transition(&mut inner, BreakerState::Open);
        }
    }

    /// Frees a half-open trial slot whose call never reported an outcome.
    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    /// Current state, without advancing an elapsed open window.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// `true` while calls are being refused: open and still inside the open
    /// window, or half-open with the trial already taken.
    pub fn is_rejecting(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => inner.opened_at.is_some_and(|at| !self.window_elapsed(at)),
            BreakerState::HalfOpen => inner.trial_in_flight,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// An open window too long to represent as an `Instant` never elapses.
    fn window_elapsed(&self, opened_at: Instant) -> bool {
        opened_at
            .checked_add(self.config.open_duration)
            .is_some_and(|until| self.clock.now() >= until)
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        if to == BreakerState::Open {
            tracing::warn!(
                breaker = %self.name,
                %from,
                %to,
                consecutive_failures = inner.consecutive_failures,
                "circuit breaker opened"
            );
        } else {
            tracing::info!(breaker = %self.name, %from, %to, "circuit breaker transition");
        }
    }
}

/// Admission to make one call; report the outcome with [`success`](Self::success)
/// or [`failure`](Self::failure).
///
/// Dropping a permit without reporting (the call was cancelled) frees the
/// half-open trial slot so another caller can try the dependency.
#[derive(Debug)]
#[must_use = "report the call outcome through the permit"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Permit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_trial();
        }
    }
}
