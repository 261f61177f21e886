//! [`CircuitBreaker`]: trips after repeated failures, short-circuits calls
//! while open, and allows exactly one trial call through while half-open.
//! The three-state machine and cooldown-driven transition to half-open are
//! grounded on the resilience crate's breaker; the single-trial-in-flight
//! rule is stricter than that grounding (which lets several callers probe
//! concurrently) because the specification requires it.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, ErrorKind};
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawState {
    Closed,
    Open,
    HalfOpen,
}

/// Public snapshot of a breaker's state, for callers that only want to
/// observe it (e.g. [`crate::pool::Pool::metrics`]) without driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed
    }
}

impl From<RawState> for CircuitState {
    fn from(raw: RawState) -> Self {
        match raw {
            RawState::Closed => CircuitState::Closed,
            RawState::Open => CircuitState::Open,
            RawState::HalfOpen => CircuitState::HalfOpen,
        }
    }
}

struct Inner {
    state: RawState,
    failure_count: u32,
    next_probe_at: Option<Instant>,
}

/// Configuration for one breaker instance.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

/// Named circuit breaker instance. The specification distinguishes a
/// per-server breaker from per-operation-class breakers composed on top of
/// it — this type is the single building block both use; composition order
/// is the retry engine's responsibility (`crate::retry`).
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    /// Set while a HALF_OPEN trial call is in flight, so concurrent callers
    /// fail fast with `CIRCUIT_OPEN` rather than all becoming trial calls.
    probe_in_flight: AtomicBool,
    metrics: std::sync::Arc<dyn Metrics>,
}

/// What the caller should do, returned by [`CircuitBreaker::try_acquire`].
pub enum Admission {
    /// Proceed with the call normally.
    Allowed,
    /// Proceed, but this call is the sole HALF_OPEN trial; report its
    /// outcome via [`CircuitBreaker::on_success`]/[`on_failure`] promptly.
    Trial,
    /// Reject immediately with `CIRCUIT_OPEN`.
    Denied,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, metrics: std::sync::Arc<dyn Metrics>) -> Self {
        CircuitBreaker {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: RawState::Closed,
                failure_count: 0,
                next_probe_at: None,
            }),
            probe_in_flight: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call before attempting the guarded operation.
    pub fn try_acquire(&self) -> Admission {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            RawState::Closed => Admission::Allowed,
            RawState::Open => {
                let ready = inner.next_probe_at.map(|at| now >= at).unwrap_or(false);
                if !ready {
                    return Admission::Denied;
                }
                inner.state = RawState::HalfOpen;
                self.metrics.record_circuit_transition();
                tracing::info!(breaker = %self.name, "circuit half-open, awaiting trial");
                drop(inner);
                self.claim_trial_or_deny()
            }
            RawState::HalfOpen => {
                drop(inner);
                self.claim_trial_or_deny()
            }
        }
    }

    fn claim_trial_or_deny(&self) -> Admission {
        if self
            .probe_in_flight
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
        {
            Admission::Trial
        } else {
            Admission::Denied
        }
    }

    /// Call after a guarded operation succeeds. Must be called exactly once
    /// per `Allowed`/`Trial` admission.
    pub fn on_success(&self) {
        let was_trial = self.probe_in_flight.swap(false, AtomicOrdering::AcqRel);
        let mut inner = self.inner.lock().unwrap();
        if was_trial || inner.state == RawState::HalfOpen {
            inner.state = RawState::Closed;
            inner.failure_count = 0;
            inner.next_probe_at = None;
            self.metrics.record_circuit_transition();
            tracing::info!(breaker = %self.name, "circuit closed after successful trial");
        } else if inner.state == RawState::Closed {
            inner.failure_count = 0;
        }
    }

    /// Call after a guarded operation fails. Must be called exactly once per
    /// `Allowed`/`Trial` admission.
    pub fn on_failure(&self) {
        let was_trial = self.probe_in_flight.swap(false, AtomicOrdering::AcqRel);
        let mut inner = self.inner.lock().unwrap();

        if was_trial || inner.state == RawState::HalfOpen {
            self.trip(&mut inner);
            return;
        }

        inner.failure_count += 1;
        if inner.failure_count >= self.config.failure_threshold {
            self.trip(&mut inner);
        }
    }

    fn trip(&self, inner: &mut Inner) {
        inner.state = RawState::Open;
        inner.next_probe_at = Some(Instant::now() + self.config.open_duration);
        inner.failure_count = 0;
        self.metrics.record_circuit_transition();
        tracing::warn!(breaker = %self.name, "circuit opened");
    }

    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        matches!(inner.state, RawState::Open)
    }

    /// Current state, for observability surfaces that don't drive the
    /// breaker (e.g. a metrics snapshot).
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state.into()
    }

    /// Convenience error for a `Denied` admission.
    pub fn denied_error(&self) -> Error {
        Error::new(ErrorKind::CircuitOpen, format!("circuit breaker '{}' is open", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use std::sync::Arc;

    fn breaker(threshold: u32, open_for: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_duration: open_for,
            },
            Arc::new(NoopMetrics),
        )
    }

    #[tokio::test]
    async fn stays_closed_below_threshold() {
        let cb = breaker(3, Duration::from_secs(30));
        for _ in 0..2 {
            assert!(matches!(cb.try_acquire(), Admission::Allowed));
            cb.on_failure();
        }
        assert!(!cb.is_open());
    }

    #[tokio::test]
    async fn trips_open_at_threshold() {
        let cb = breaker(3, Duration::from_secs(30));
        for _ in 0..3 {
            assert!(matches!(cb.try_acquire(), Admission::Allowed));
            cb.on_failure();
        }
        assert!(cb.is_open());
        assert!(matches!(cb.try_acquire(), Admission::Denied));
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let cb = breaker(3, Duration::from_secs(30));
        cb.try_acquire();
        cb.on_failure();
        cb.try_acquire();
        cb.on_failure();
        cb.try_acquire();
        cb.on_success();
        for _ in 0..2 {
            assert!(matches!(cb.try_acquire(), Admission::Allowed));
            cb.on_failure();
        }
        assert!(!cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_permits_exactly_one_trial() {
        let cb = breaker(1, Duration::from_millis(1));
        cb.try_acquire();
        cb.on_failure();
        assert!(cb.is_open());

        tokio::time::sleep(Duration::from_millis(5)).await;

        let first = cb.try_acquire();
        assert!(matches!(first, Admission::Trial));
        let second = cb.try_acquire();
        assert!(matches!(second, Admission::Denied));

        cb.on_success();
        assert!(!cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_circuit() {
        let cb = breaker(1, Duration::from_millis(1));
        cb.try_acquire();
        cb.on_failure();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(matches!(cb.try_acquire(), Admission::Trial));
        cb.on_failure();
        assert!(cb.is_open());
    }
}
