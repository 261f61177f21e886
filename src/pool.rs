//! [`Pool`]: a bounded, generic pool of FTP [`Connection`]s. The shape —
//! `Arc<SharedPool>` wrapping a mutex-guarded internals struct, a semaphore
//! bounding total connections, and a `Drop`-guarded [`PooledConnection`]
//! that returns itself on the caller's behalf — is `bb8::Pool`'s; this
//! generalizes it from "any `ManageConnection`" down to "one FTP target",
//! and adds the eviction-policy, fairness, and test-on-return knobs the
//! specification asks for that the generic pool didn't need.

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::circuit::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::config::{EvictionPolicy, Ordering as PoolOrdering, PoolConfig};
use crate::connection::Connection;
use crate::error::{Error, ErrorKind};
use crate::health::PoolHealth;
use crate::manager::ConnectionManager;
use crate::metrics::{Metrics, NoopMetrics, PoolMetricsSnapshot};
use crate::transport::FtpTransport;

struct Internals<T: FtpTransport> {
    idle: VecDeque<Connection<T>>,
    total: u32,
    shutting_down: bool,
}

struct SharedPool<T: FtpTransport> {
    config: PoolConfig,
    manager: ConnectionManager<T>,
    circuit: CircuitBreaker,
    metrics: Arc<dyn Metrics>,
    semaphore: Arc<Semaphore>,
    internals: Mutex<Internals<T>>,
}

/// A bounded pool of connections to one FTP target.
pub struct Pool<T: FtpTransport> {
    shared: Arc<SharedPool<T>>,
}

impl<T: FtpTransport> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            shared: self.shared.clone(),
        }
    }
}

impl<T: FtpTransport> Pool<T> {
    /// Brings the pool up to `min_idle` in the background so the first
    /// caller to borrow doesn't pay for a cold pool.
    fn schedule_startup_replenish(&self) {
        if self.shared.config.min_idle == 0 {
            return;
        }
        let shared = self.shared.clone();
        tokio::spawn(async move {
            replenish_min_idle(&shared).await;
        });
    }

    fn schedule_eviction(&self) {
        if self.shared.config.eviction_run_interval.is_zero() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        let interval = self.shared.config.eviction_run_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { return };
                run_eviction_pass(&shared).await;
            }
        });
    }

    /// Builds a pool and starts its background eviction sweep. `metrics` may
    /// be `None` to use [`NoopMetrics`].
    pub fn new(manager: ConnectionManager<T>, config: PoolConfig, metrics: Option<Arc<dyn Metrics>>) -> Self {
        let metrics = metrics.unwrap_or_else(|| Arc::new(NoopMetrics));
        let shared = Arc::new(SharedPool {
            semaphore: Arc::new(Semaphore::new(config.max_total as usize)),
            circuit: CircuitBreaker::new("pool", CircuitBreakerConfig::default(), metrics.clone()),
            internals: Mutex::new(Internals {
                idle: VecDeque::new(),
                total: 0,
                shutting_down: false,
            }),
            manager,
            config,
            metrics,
        });

        let pool = Pool { shared };
        pool.schedule_startup_replenish();
        pool.schedule_eviction();
        pool
    }

    /// Borrows a connection, waiting up to `PoolConfig::max_wait` (or
    /// forever when `None`, or failing immediately when
    /// `block_when_exhausted` is false and the pool is currently saturated).
    pub async fn borrow(&self) -> Result<PooledConnection<T>, Error> {
        let permit = self.acquire_permit().await?;

        loop {
            let candidate = {
                let mut internals = self.shared.internals.lock().await;
                if internals.shutting_down {
                    drop(internals);
                    drop(permit);
                    return Err(Error::new(ErrorKind::PoolExhausted, "pool is shutting down"));
                }
                pop_idle(&mut internals.idle, self.shared.config.ordering)
            };

            match candidate {
                Some(mut conn) => {
                    if self.shared.config.test_on_borrow {
                        let ok = self.shared.manager.validate(&mut conn).await.unwrap_or(false);
                        if !ok {
                            self.destroy(conn).await;
                            continue;
                        }
                    }
                    conn.touch_used();
                    self.shared.metrics.record_borrow();
                    return Ok(PooledConnection {
                        pool: self.clone(),
                        conn: Some(conn),
                        permit: Some(permit),
                        invalidated: false,
                    });
                }
                None => {
                    let mut conn = self.create_connection().await?;
                    conn.touch_used();
                    self.shared.metrics.record_borrow();
                    return Ok(PooledConnection {
                        pool: self.clone(),
                        conn: Some(conn),
                        permit: Some(permit),
                        invalidated: false,
                    });
                }
            }
        }
    }

    /// Acquires one of the pool's `max-total` capacity permits, honoring
    /// `block-when-exhausted` and `max-wait`. Waiters queue FIFO (the
    /// semaphore's native fairness), which is what `fair-wait` asks for;
    /// `fair-wait = false` additionally allows a just-arrived borrower to
    /// win a race against a longer-waiting one when both become ready in
    /// the same scheduler tick, by trying a non-blocking acquire first.
    async fn acquire_permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit, Error> {
        let semaphore = self.shared.semaphore.clone();

        if !self.shared.config.fair_wait {
            if let Ok(permit) = semaphore.clone().try_acquire_owned() {
                return Ok(permit);
            }
        }

        if !self.shared.config.block_when_exhausted {
            return semaphore
                .try_acquire_owned()
                .map_err(|_| Error::pool_exhausted());
        }

        match self.shared.config.max_wait {
            None => semaphore
                .acquire_owned()
                .await
                .map_err(|_| Error::new(ErrorKind::PoolExhausted, "pool semaphore closed")),
            Some(wait) => tokio::time::timeout(wait, semaphore.acquire_owned())
                .await
                .map_err(|_| Error::pool_exhausted())?
                .map_err(|_| Error::new(ErrorKind::PoolExhausted, "pool semaphore closed")),
        }
    }

    async fn create_connection(&self) -> Result<Connection<T>, Error> {
        let conn = dial(&self.shared).await?;
        self.shared.internals.lock().await.total += 1;
        Ok(conn)
    }

    async fn destroy(&self, mut conn: Connection<T>) {
        self.shared.manager.close(&mut conn).await;
        let mut internals = self.shared.internals.lock().await;
        internals.total = internals.total.saturating_sub(1);
    }

    async fn release(&self, mut conn: Connection<T>, invalidated: bool) {
        if invalidated || !conn.state.is_usable() {
            self.shared.metrics.record_invalidate();
            self.destroy(conn).await;
            return;
        }

        if self.shared.config.test_on_return {
            let ok = self.shared.manager.validate(&mut conn).await.unwrap_or(false);
            if !ok {
                self.destroy(conn).await;
                return;
            }
        }

        let mut internals = self.shared.internals.lock().await;
        if internals.shutting_down || internals.idle.len() as u32 >= self.shared.config.max_idle {
            drop(internals);
            self.destroy(conn).await;
            return;
        }
        internals.idle.push_back(conn);
        drop(internals);
        self.shared.metrics.record_return();
    }

    /// Point-in-time counters for this pool, layering live `total`/`idle`
    /// counts and the current circuit/health state on top of whatever the
    /// injected [`Metrics`] implementation tracks (see [`Metrics::snapshot`]).
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let mut snap = self.shared.metrics.snapshot();
        if let Ok(internals) = self.shared.internals.try_lock() {
            snap.total = internals.total;
            snap.idle = internals.idle.len() as u32;
        }
        snap.circuit_state = self.shared.circuit.state();
        snap.health = pool_health(snap.circuit_state, snap.idle, self.shared.config.min_idle);
        snap
    }

    /// Runs `f` with a borrowed connection and guarantees its release (or
    /// destruction, if `f` invalidates it) on every exit path, including a
    /// panic unwind through the `Drop` guard.
    ///
    /// `f` returns a boxed future rather than an associated type so that it
    /// may borrow the `&mut T` it's given — an `FnOnce(&mut T) -> Fut` with
    /// a single `Fut` type cannot express that borrow for any lifetime.
    pub async fn with_connection<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: for<'a> FnOnce(&'a mut T) -> Pin<Box<dyn Future<Output = Result<R, Error>> + Send + 'a>>,
    {
        let mut pooled = self.borrow().await?;
        let result = f(&mut pooled).await;
        if result.is_err() {
            pooled.invalidate();
        }
        result
    }

    /// Idempotent: closes every idle connection and prevents further
    /// borrows. In-flight borrows still return their connections, which are
    /// then closed immediately rather than re-pooled.
    pub async fn shutdown(&self, timeout: Duration) {
        {
            let mut internals = self.shared.internals.lock().await;
            internals.shutting_down = true;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let mut internals = self.shared.internals.lock().await;
            while let Some(mut conn) = internals.idle.pop_front() {
                drop(internals);
                self.shared.manager.close(&mut conn).await;
                internals = self.shared.internals.lock().await;
                internals.total = internals.total.saturating_sub(1);
            }
            let done = internals.total == 0;
            drop(internals);
            if done || Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn pop_idle<T: FtpTransport>(idle: &mut VecDeque<Connection<T>>, ordering: PoolOrdering) -> Option<Connection<T>> {
    match ordering {
        PoolOrdering::Lifo => idle.pop_back(),
        PoolOrdering::Fifo => idle.pop_front(),
    }
}

/// Error kinds that reflect the server/transport's own health rather than a
/// caller/config mistake. Only these advance the circuit breaker's CLOSED-state
/// failure count or trip it; auth/permission/path errors are neither success
/// nor breaker-failure, since the server is reachable and functioning.
fn is_server_health_failure(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionTimeout | ErrorKind::ConnectionClosed | ErrorKind::ServerError
    )
}

/// Dials one new physical connection, gated by the pool's circuit breaker.
/// The sole call site that records `record_create`, so creation is counted
/// exactly once regardless of whether the caller is a borrow miss or
/// min-idle replenishment.
async fn dial<T: FtpTransport>(shared: &Arc<SharedPool<T>>) -> Result<Connection<T>, Error> {
    if matches!(shared.circuit.try_acquire(), Admission::Denied) {
        return Err(shared.circuit.denied_error());
    }

    let result = shared.manager.create().await;
    match &result {
        Ok(_) => shared.circuit.on_success(),
        Err(err) if is_server_health_failure(err.kind) => shared.circuit.on_failure(),
        Err(_) => {}
    }
    let conn = result?;
    shared.metrics.record_create();
    Ok(conn)
}

/// Lightweight, synchronous-friendly health label derived from the breaker
/// state and idle headroom. Distinct from [`crate::health::HealthMonitor`],
/// which classifies individual connections asynchronously; this is a
/// best-effort summary for [`Pool::metrics`], which must not block on I/O.
fn pool_health(circuit: CircuitState, idle: u32, min_idle: u32) -> PoolHealth {
    match circuit {
        CircuitState::Open => PoolHealth::Poor,
        CircuitState::HalfOpen => PoolHealth::Degraded,
        CircuitState::Closed if min_idle > 0 && idle == 0 => PoolHealth::Fair,
        CircuitState::Closed => PoolHealth::Excellent,
    }
}

async fn run_eviction_pass<T: FtpTransport>(shared: &Arc<SharedPool<T>>) {
    let now = Instant::now();
    let mut internals = shared.internals.lock().await;
    if internals.shutting_down {
        return;
    }

    let min_idle = shared.config.min_idle;
    let min_evictable = shared.config.min_evictable_idle_time;
    let policy = shared.config.eviction_policy;

    let mut victims = Vec::new();
    if policy != EvictionPolicy::None {
        let mut candidates: Vec<usize> = (0..internals.idle.len())
            .filter(|&i| internals.idle[i].idle_for(now) >= min_evictable)
            .collect();

        order_candidates(&mut candidates, &internals.idle, policy);

        let evictable_count = internals.idle.len().saturating_sub(min_idle as usize);
        victims = candidates.into_iter().take(evictable_count).collect();
        victims.sort_unstable_by(|a, b| b.cmp(a));
    }

    let mut removed = Vec::new();
    for idx in victims {
        removed.push(internals.idle.remove(idx).unwrap());
    }

    if shared.config.test_while_idle {
        for conn in internals.idle.iter_mut() {
            if now.duration_since(conn.last_tested_at) >= shared.config.eviction_run_interval {
                let _ = shared.manager.validate(conn).await;
            }
        }
        internals.idle.retain(|c| c.state.is_usable());
    }

    drop(internals);

    for mut conn in removed {
        shared.manager.close(&mut conn).await;
        let mut internals = shared.internals.lock().await;
        internals.total = internals.total.saturating_sub(1);
    }

    replenish_min_idle(shared).await;
}

/// Dials fresh connections up to `min_idle`, so the pool doesn't merely
/// trim down to that floor during eviction but actively maintains it (and,
/// via `Pool::new`'s startup call, reaches it before any caller borrows).
/// Stops at the first dial failure for this pass rather than hammering a
/// down server; the next eviction tick or the circuit breaker's own
/// cooldown governs the retry cadence.
async fn replenish_min_idle<T: FtpTransport>(shared: &Arc<SharedPool<T>>) {
    loop {
        {
            let internals = shared.internals.lock().await;
            if internals.shutting_down
                || internals.idle.len() as u32 >= shared.config.min_idle
                || internals.total >= shared.config.max_total
            {
                return;
            }
        }

        let Ok(permit) = shared.semaphore.clone().try_acquire_owned() else {
            return;
        };

        let mut conn = match dial(shared).await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::debug!(kind = %err.kind, "min-idle replenishment dial failed");
                return;
            }
        };
        drop(permit);

        let mut internals = shared.internals.lock().await;
        internals.total += 1;
        if internals.shutting_down || internals.idle.len() as u32 >= shared.config.max_idle {
            drop(internals);
            shared.manager.close(&mut conn).await;
            let mut internals = shared.internals.lock().await;
            internals.total = internals.total.saturating_sub(1);
        } else {
            internals.idle.push_back(conn);
        }
    }
}

fn order_candidates<T: FtpTransport>(candidates: &mut [usize], idle: &VecDeque<Connection<T>>, policy: EvictionPolicy) {
    match policy {
        EvictionPolicy::Oldest => candidates.sort_by_key(|&i| idle[i].created_at),
        EvictionPolicy::Lru => candidates.sort_by_key(|&i| idle[i].last_used_at),
        EvictionPolicy::Mru => candidates.sort_by_key(|&i| std::cmp::Reverse(idle[i].last_used_at)),
        EvictionPolicy::None => {}
    }
}

/// RAII handle to a borrowed connection. Returns the connection to its pool
/// on drop unless [`invalidate`](Self::invalidate) was called, in which case
/// it is closed instead.
pub struct PooledConnection<T: FtpTransport> {
    pool: Pool<T>,
    conn: Option<Connection<T>>,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
    invalidated: bool,
}

impl<T: FtpTransport> std::fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("invalidated", &self.invalidated)
            .finish()
    }
}

impl<T: FtpTransport> PooledConnection<T> {
    /// Marks the connection bad; it will be closed rather than returned to
    /// the idle set when this handle is dropped.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn id(&self) -> crate::connection::ConnectionId {
        self.conn.as_ref().expect("connection present until drop").id
    }
}

impl<T: FtpTransport> Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.conn
            .as_ref()
            .expect("connection present until drop")
            .session
            .as_ref()
            .expect("borrowed connection always has a session")
    }
}

impl<T: FtpTransport> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.conn
            .as_mut()
            .expect("connection present until drop")
            .session
            .as_mut()
            .expect("borrowed connection always has a session")
    }
}

impl<T: FtpTransport> Drop for PooledConnection<T> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        let pool = self.pool.clone();
        let invalidated = self.invalidated;
        let permit = self.permit.take();
        futures::executor::block_on(async move {
            pool.release(conn, invalidated).await;
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::metrics::AtomicMetrics;
    use crate::transport::mock::{MockScript, MockTransport, ScriptedOutcome};

    fn pool_for(host: &str, config: PoolConfig) -> Pool<MockTransport> {
        let conn_config = ConnectionConfig::builder(host, 21).build().unwrap();
        let metrics: Arc<dyn Metrics> = Arc::new(AtomicMetrics::new());
        let manager = ConnectionManager::new(conn_config, metrics.clone());
        Pool::new(manager, config, Some(metrics))
    }

    #[tokio::test]
    async fn borrow_then_return_reuses_connection() {
        MockScript::new().register("pool-reuse");
        let pool = pool_for("pool-reuse", PoolConfig::builder().max_total(2).build().unwrap());

        let first_id = {
            let conn = pool.borrow().await.unwrap();
            conn.id()
        };
        let second_id = {
            let conn = pool.borrow().await.unwrap();
            conn.id()
        };

        assert_eq!(first_id, second_id);
    }

    #[tokio::test]
    async fn invalidated_connection_is_not_reused() {
        MockScript::new().register("pool-invalidate");
        let pool = pool_for(
            "pool-invalidate",
            PoolConfig::builder().max_total(2).build().unwrap(),
        );

        let first_id = {
            let mut conn = pool.borrow().await.unwrap();
            conn.invalidate();
            conn.id()
        };
        let second_id = {
            let conn = pool.borrow().await.unwrap();
            conn.id()
        };

        assert_ne!(first_id, second_id);
    }

    #[tokio::test]
    async fn exhausted_pool_fails_fast_when_non_blocking() {
        MockScript::new().register("pool-exhausted");
        let pool = pool_for(
            "pool-exhausted",
            PoolConfig::builder()
                .max_total(1)
                .block_when_exhausted(false)
                .build()
                .unwrap(),
        );

        let _held = pool.borrow().await.unwrap();
        let err = pool.borrow().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PoolExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_times_out_after_max_wait() {
        MockScript::new().register("pool-max-wait");
        let pool = pool_for(
            "pool-max-wait",
            PoolConfig::builder()
                .max_total(1)
                .max_wait(Some(Duration::from_millis(50)))
                .build()
                .unwrap(),
        );

        let _held = pool.borrow().await.unwrap();
        let err = pool.borrow().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PoolExhausted);
    }

    #[tokio::test]
    async fn test_on_borrow_discards_dead_connection() {
        let script = MockScript::new();
        script.queue_noop(ScriptedOutcome::NoopFails(ErrorKind::ConnectionClosed));
        script.register("pool-test-on-borrow");
        let pool = pool_for(
            "pool-test-on-borrow",
            PoolConfig::builder()
                .max_total(3)
                .test_on_borrow(true)
                .build()
                .unwrap(),
        );

        let first_id = {
            let conn = pool.borrow().await.unwrap();
            conn.id()
        };
        let second_id = {
            let conn = pool.borrow().await.unwrap();
            conn.id()
        };
        assert_ne!(first_id, second_id);
    }

    #[tokio::test]
    async fn min_idle_is_replenished_in_background() {
        MockScript::new().register("pool-min-idle");
        let pool = pool_for(
            "pool-min-idle",
            PoolConfig::builder().max_total(3).min_idle(2).build().unwrap(),
        );

        for _ in 0..100 {
            if pool.metrics().idle >= 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.metrics().idle, 2);
        assert_eq!(pool.metrics().total, 2);
    }

    #[tokio::test]
    async fn non_server_health_errors_do_not_trip_breaker() {
        let script = MockScript::new();
        for _ in 0..10 {
            script.queue_connect(ScriptedOutcome::ConnectFails(ErrorKind::AuthenticationError));
        }
        script.register("pool-auth-no-trip");
        let pool = pool_for("pool-auth-no-trip", PoolConfig::builder().max_total(2).build().unwrap());

        for _ in 0..10 {
            let err = pool.borrow().await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::AuthenticationError);
        }
        assert_eq!(pool.metrics().circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn metrics_reports_live_total_and_idle() {
        MockScript::new().register("pool-metrics-live");
        let pool = pool_for("pool-metrics-live", PoolConfig::builder().max_total(2).build().unwrap());

        let conn = pool.borrow().await.unwrap();
        assert_eq!(pool.metrics().total, 1);
        assert_eq!(pool.metrics().idle, 0);
        drop(conn);
        assert_eq!(pool.metrics().idle, 1);
        assert_eq!(pool.metrics().health, PoolHealth::Excellent);
    }
}
