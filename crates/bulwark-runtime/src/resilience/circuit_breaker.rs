//! Circuit breaker: fail fast against an unhealthy provider and probe for
//! recovery automatically.
//!
//! # State Transitions
//! ```text
//! Closed -> Open: failure count reaches the threshold
//! Open -> HalfOpen: reset timeout elapsed (on a call, or via the idle monitor)
//! HalfOpen -> Closed: probe call succeeds
//! HalfOpen -> Open: probe call fails
//! ```
//!
//! While HalfOpen, exactly one probe is admitted to the primary; concurrent
//! calls route to the fallback until the probe settles. The breaker never
//! interprets response content — a rejected primary future is the only
//! failure signal.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Circuit breaker configuration, fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive primary failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time an open circuit waits before admitting a probe.
    #[serde(with = "crate::config::duration_str")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; calls go to the primary.
    Closed,
    /// Primary bypassed; calls go straight to the fallback.
    Open,
    /// Recovery test; a single probe is admitted to the primary.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

type TransitionObserver = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// How a single call will be routed.
enum Route {
    Primary,
    FallbackOnly,
}

struct Shared {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    observers: RwLock<Vec<TransitionObserver>>,
}

impl Shared {
    /// Change state under an already-held lock. Returns the transition so
    /// the caller can notify observers after releasing the lock.
    fn set_state(
        &self,
        inner: &mut BreakerState,
        to: CircuitState,
    ) -> Option<(CircuitState, CircuitState)> {
        if inner.state == to {
            return None;
        }
        let from = inner.state;
        inner.state = to;
        Some((from, to))
    }

    /// Fire observers for a transition. Must be called with the lock released.
    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = transition else { return };
        tracing::info!(%from, %to, "circuit state changed");
        for observer in self.observers.read().iter() {
            observer(from, to);
        }
    }

    fn plan_route(&self) -> Route {
        let mut inner = self.state.lock();
        match inner.state {
            CircuitState::Closed => Route::Primary,
            CircuitState::Open => {
                let eligible = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
                if eligible {
                    let transition = self.set_state(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    drop(inner);
                    self.notify(transition);
                    Route::Primary
                } else {
                    Route::FallbackOnly
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Route::FallbackOnly
                } else {
                    inner.probe_in_flight = true;
                    Route::Primary
                }
            }
        }
    }

    fn on_primary_success(&self) {
        let mut inner = self.state.lock();
        inner.failures = 0;
        inner.probe_in_flight = false;
        let transition = match inner.state {
            CircuitState::HalfOpen => self.set_state(&mut inner, CircuitState::Closed),
            _ => None,
        };
        drop(inner);
        self.notify(transition);
    }

    fn on_primary_failure(&self) {
        let mut inner = self.state.lock();
        let transition = match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.last_failure = Some(Instant::now());
                    self.set_state(&mut inner, CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.last_failure = Some(Instant::now());
                self.set_state(&mut inner, CircuitState::Open)
            }
            CircuitState::Open => None,
        };
        drop(inner);
        self.notify(transition);
    }

    /// Open -> HalfOpen eligibility check, used by the idle monitor so a
    /// circuit can recover during quiet periods with no traffic.
    fn reopen_check(&self) {
        let mut inner = self.state.lock();
        if inner.state != CircuitState::Open {
            return;
        }
        let eligible = inner
            .last_failure
            .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
        if eligible {
            let transition = self.set_state(&mut inner, CircuitState::HalfOpen);
            drop(inner);
            self.notify(transition);
        }
    }
}

/// Three-state failure isolation around a primary/fallback call pair.
pub struct CircuitBreaker {
    shared: Arc<Shared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl CircuitBreaker {
    /// Create a new breaker in the Closed state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BreakerState {
                    state: CircuitState::Closed,
                    failures: 0,
                    last_failure: None,
                    probe_in_flight: false,
                }),
                observers: RwLock::new(Vec::new()),
            }),
            monitor: Mutex::new(None),
        }
    }

    /// Run a protected call.
    ///
    /// Routes to `primary` or `fallback` per the current state and returns
    /// whichever result was produced; the breaker itself never fails. A
    /// primary rejection is counted, then the fallback is invoked.
    pub async fn execute<T, E, P, PFut, F, FFut>(&self, primary: P, fallback: F) -> Result<T, E>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, E>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match self.shared.plan_route() {
            Route::Primary => match primary().await {
                Ok(value) => {
                    self.shared.on_primary_success();
                    Ok(value)
                }
                Err(error) => {
                    tracing::warn!(error = %error, "primary call failed");
                    self.shared.on_primary_failure();
                    fallback().await
                }
            },
            Route::FallbackOnly => {
                tracing::debug!("circuit open, primary bypassed");
                fallback().await
            }
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> CircuitState {
        self.shared.state.lock().state
    }

    /// Consecutive failure count since the last success.
    pub fn failure_count(&self) -> u32 {
        self.shared.state.lock().failures
    }

    /// Force the circuit Closed with zero failures. Manual override; also
    /// used by the health monitor after a successful probe.
    pub fn reset(&self) {
        let mut inner = self.shared.state.lock();
        inner.failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        let transition = self.shared.set_state(&mut inner, CircuitState::Closed);
        drop(inner);
        self.shared.notify(transition);
    }

    /// Register a transition observer, invoked as `(from, to)` on every
    /// state change.
    pub fn on_transition(
        &self,
        observer: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    ) {
        self.shared.observers.write().push(Arc::new(observer));
    }

    /// Start the idle monitor: a timer task that re-evaluates Open ->
    /// HalfOpen eligibility between calls. Calling it twice is a no-op.
    ///
    /// Must run inside a tokio runtime.
    pub fn spawn_monitor(&self) {
        let mut slot = self.monitor.lock();
        if slot.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let period = shared.config.reset_timeout.max(Duration::from_millis(10));
        *slot = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                shared.reopen_check();
            }
        }));
    }

    /// Cancel the idle monitor. Safe to call repeatedly.
    pub fn dispose(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        self.dispose();
    }
}
