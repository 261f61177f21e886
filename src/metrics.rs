//! Pool instrumentation. The specification calls for observability without
//! mandating a concrete metrics backend, so this follows the same shape the
//! error sink takes in `bb8::Builder::error_sink`: a small trait the caller
//! implements against whatever collector (Prometheus, StatsD, a test probe)
//! they actually run, plus a no-op default so wiring one up is optional.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::circuit::CircuitState;
use crate::health::PoolHealth;

/// Point-in-time counters exposed by [`crate::pool::Pool::metrics`]. The
/// cumulative counters below come from whatever [`Metrics`] implementation
/// the pool was built with; `total`/`idle`/`circuit_state`/`health` are
/// filled in by the pool itself from its own live state, since no injected
/// collector can see inside `SharedPool`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub borrows: u64,
    pub returns: u64,
    pub invalidations: u64,
    pub creates: u64,
    pub destroys: u64,
    pub retries: u64,
    pub circuit_transitions: u64,
    pub total: u32,
    pub idle: u32,
    pub circuit_state: CircuitState,
    pub health: PoolHealth,
}

/// Sink for pool lifecycle events. Implementations must not block or panic;
/// they run on the caller's hot path.
pub trait Metrics: Send + Sync {
    fn record_borrow(&self) {}
    fn record_return(&self) {}
    fn record_invalidate(&self) {}
    fn record_create(&self) {}
    fn record_destroy(&self) {}
    fn record_retry(&self) {}
    fn record_circuit_transition(&self) {}

    /// Point-in-time counters, when the implementation tracks them.
    /// Implementations that only forward to an external collector (e.g. a
    /// Prometheus exporter) can leave this at its default.
    fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot::default()
    }
}

/// Discards every event. The default when a caller doesn't care to wire up
/// a collector.
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

/// In-process counters, readable without a collector. Useful for tests and
/// for embedding behind a `/metrics` handler the caller already runs.
#[derive(Default)]
pub struct AtomicMetrics {
    borrows: AtomicU64,
    returns: AtomicU64,
    invalidations: AtomicU64,
    creates: AtomicU64,
    destroys: AtomicU64,
    retries: AtomicU64,
    circuit_transitions: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metrics for AtomicMetrics {
    fn record_borrow(&self) {
        self.borrows.fetch_add(1, Ordering::Relaxed);
    }

    fn record_return(&self) {
        self.returns.fetch_add(1, Ordering::Relaxed);
    }

    fn record_invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    fn record_create(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    fn record_destroy(&self) {
        self.destroys.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_circuit_transition(&self) {
        self.circuit_transitions.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            borrows: self.borrows.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            destroys: self.destroys.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            circuit_transitions: self.circuit_transitions.load(Ordering::Relaxed),
            // `total`/`idle`/`circuit_state`/`health` are live pool state,
            // not counters this sink accumulates; `Pool::metrics` fills
            // them in after calling this.
            ..PoolMetricsSnapshot::default()
        }
    }
}
