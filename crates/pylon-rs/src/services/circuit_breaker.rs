//! Circuit breaker protecting the upstream services.
//!
//! One breaker exists per logical upstream service (`infoblox_api`,
//! `atcfw_api`). The state machine is the classic three-state one:
//!
//! * `Closed` - normal operation, calls pass through
//! * `Open` - failing fast, calls rejected without touching upstream
//! * `HalfOpen` - reset timeout elapsed, a single probe is admitted
//!
//! Only the resilience pipeline mutates breaker state; observability
//! reads it. The failure counter counts *consecutive counted*
//! failures; the pipeline excludes client errors, rate limits,
//! deadline expiry and cancellations before calling
//! [`CircuitBreaker::on_failure`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use log::{debug, info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed = 0,
    /// Circuit is open - failing fast
    Open = 1,
    /// Testing if the service recovered
    HalfOpen = 2,
}

impl CircuitState {
    /// Gauge encoding exposed on `circuit_breaker_state`:
    /// 0 closed, 0.5 half-open, 1 open.
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 0.5,
        }
    }

    /// snake_case token used in logs and trace attributes.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// A state change observed by a pipeline call, reported upward so the
/// caller can attach metrics and a correlation id to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Configuration parameters for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures that open the circuit.
    pub failure_threshold: u64,
    /// Time to wait in `Open` before admitting a probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker for one upstream service.
///
/// Hot-path reads use atomics; the state-change timestamp sits behind
/// a std `RwLock` that is never held across an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU64,
    open_count: AtomicU64,
    probe_in_flight: AtomicBool,
    last_state_change: RwLock<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            name,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            open_count: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            last_state_change: RwLock::new(Instant::now()),
        })
    }

    /// Gate check before an upstream call.
    ///
    /// Returns `Ok(transition?)` when the call may proceed (the
    /// transition is `Some` when this acquisition moved the breaker
    /// from `Open` to `HalfOpen`), or `Err(())` when the call must
    /// fail fast with `CircuitOpen`.
    pub fn try_acquire(&self) -> Result<Option<Transition>, ()> {
        match self.state() {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                let elapsed = self.last_state_change.read().unwrap().elapsed();
                if elapsed < self.config.reset_timeout {
                    debug!("circuit breaker {} is open, failing fast", self.name);
                    return Err(());
                }
                // Reset timeout elapsed: move to half-open and admit
                // exactly one probe. A racing caller that loses the
                // probe flag is rejected.
                let transition = self.transition(CircuitState::HalfOpen);
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    Ok(transition)
                } else {
                    Err(())
                }
            }
            CircuitState::HalfOpen => {
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    Ok(None)
                } else {
                    debug!("circuit breaker {} probe already in flight", self.name);
                    Err(())
                }
            }
        }
    }

    /// Records a successful call.
    pub fn on_success(&self) -> Option<Transition> {
        self.probe_in_flight.store(false, Ordering::Release);
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
                None
            }
            CircuitState::HalfOpen => {
                self.failure_count.store(0, Ordering::Relaxed);
                let transition = self.transition(CircuitState::Closed);
                info!("circuit breaker {} closed, service recovered", self.name);
                transition
            }
            // A call admitted before the trip can still complete
            // while the breaker is open; its success is ignored.
            CircuitState::Open => None,
        }
    }

    /// Records a counted failure. The caller has already filtered the
    /// excluded error classes.
    pub fn on_failure(&self) -> Option<Transition> {
        self.probe_in_flight.store(false, Ordering::Release);
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    let transition = self.trip();
                    warn!(
                        "circuit breaker {} opened after {} consecutive failures",
                        self.name, failures
                    );
                    transition
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed: straight back to open.
                let transition = self.trip();
                warn!("circuit breaker {} reopened, probe failed", self.name);
                transition
            }
            CircuitState::Open => None,
        }
    }

    fn trip(&self) -> Option<Transition> {
        let transition = self.transition(CircuitState::Open);
        if transition.is_some() {
            self.open_count.fetch_add(1, Ordering::Relaxed);
        }
        transition
    }

    fn transition(&self, to: CircuitState) -> Option<Transition> {
        let from = CircuitState::from(self.state.swap(to as u8, Ordering::AcqRel));
        if from == to {
            return None;
        }
        *self.last_state_change.write().unwrap() = Instant::now();
        Some(Transition { from, to })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Cumulative number of `* -> Open` transitions.
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    /// How long the breaker has sat in its current state.
    pub fn time_in_state(&self) -> Duration {
        self.last_state_change.read().unwrap().elapsed()
    }

    /// Frees the half-open probe slot without recording an outcome.
    /// Called when a probe call is dropped (cancellation, deadline)
    /// before it could report success or failure.
    pub fn release_probe(&self) {
        self.probe_in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u64, reset: Duration) -> Arc<CircuitBreaker> {
        CircuitBreaker::new(
            "test".to_string(),
            CircuitBreakerConfig { failure_threshold: threshold, reset_timeout: reset },
        )
    }

    #[test]
    fn opens_on_exactly_the_threshold_failure() {
        let cb = breaker(3, Duration::from_secs(60));
        assert!(cb.on_failure().is_none());
        assert!(cb.on_failure().is_none());
        assert_eq!(cb.state(), CircuitState::Closed);
        let transition = cb.on_failure().expect("third failure trips");
        assert_eq!(transition.to, CircuitState::Open);
        assert_eq!(cb.open_count(), 1);
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn success_resets_consecutive_count() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn admits_single_probe_after_reset() {
        let cb = breaker(1, Duration::from_millis(0));
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let first = cb.try_acquire().expect("probe admitted");
        assert_eq!(
            first,
            Some(Transition { from: CircuitState::Open, to: CircuitState::HalfOpen })
        );
        // Second concurrent caller is rejected while the probe is out.
        assert!(cb.try_acquire().is_err());

        let transition = cb.on_success().expect("probe success closes");
        assert_eq!(transition.to, CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn probe_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(0));
        cb.on_failure();
        cb.try_acquire().expect("probe admitted");
        let transition = cb.on_failure().expect("probe failure reopens");
        assert_eq!(transition.from, CircuitState::HalfOpen);
        assert_eq!(transition.to, CircuitState::Open);
        assert_eq!(cb.open_count(), 2);
    }
}
