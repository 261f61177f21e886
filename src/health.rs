//! [`HealthMonitor`]: an independent-clock observer over a set of
//! connections that classifies each one and attempts bounded repair via the
//! [`ConnectionManager`], without ever touching the pool's borrow path.
//! Structure (a `HealthConfig`, per-target classification, an aggregate
//! score) is grounded on the resilience crate's monitor; the per-item
//! classification here is connection liveness rather than disk/throughput
//! samples.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::connection::{Connection, ConnectionState};
use crate::manager::ConnectionManager;
use crate::transport::FtpTransport;

#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub warning_threshold: u32,
    pub failure_threshold: u32,
    pub max_repair_attempts: u32,
    pub check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            warning_threshold: 2,
            failure_threshold: 5,
            max_repair_attempts: 3,
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Per-connection classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    Healthy,
    Degraded,
    Failed,
    Repairing,
}

/// Aggregate score across every connection observed in a check pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolHealth {
    Excellent,
    Good,
    Fair,
    Degraded,
    Poor,
}

impl Default for PoolHealth {
    fn default() -> Self {
        PoolHealth::Excellent
    }
}

/// Tracks consecutive-failure counts per connection id across check passes,
/// and drives repair via the connection manager. Stateless with respect to
/// the pool: it never calls `Pool::borrow`, only `ConnectionManager`
/// lifecycle operations directly on connections the caller hands it.
pub struct HealthMonitor<T: FtpTransport> {
    config: HealthConfig,
    manager: ConnectionManager<T>,
    repair_attempts: std::sync::Mutex<std::collections::HashMap<crate::connection::ConnectionId, AtomicU32>>,
}

impl<T: FtpTransport> HealthMonitor<T> {
    pub fn new(config: HealthConfig, manager: ConnectionManager<T>) -> Self {
        HealthMonitor {
            config,
            manager,
            repair_attempts: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Classifies one connection from its error ring and state, without
    /// mutating it.
    pub fn classify(&self, conn: &Connection<T>) -> ConnectionHealth {
        if conn.state == ConnectionState::Reconnecting {
            return ConnectionHealth::Repairing;
        }
        if !conn.state.is_usable() {
            return ConnectionHealth::Failed;
        }

        let recent_failures = conn
            .last_errors
            .iter()
            .filter(|e| e.kind.recoverable())
            .count() as u32;

        if recent_failures >= self.config.failure_threshold {
            ConnectionHealth::Failed
        } else if recent_failures >= self.config.warning_threshold {
            ConnectionHealth::Degraded
        } else {
            ConnectionHealth::Healthy
        }
    }

    /// Runs one check pass over `conns`, attempting repair on any connection
    /// classified `Failed` whose repair-attempt budget for this episode
    /// isn't exhausted. Returns the aggregate [`PoolHealth`] for the pass.
    pub async fn check(&self, conns: &mut [Connection<T>]) -> PoolHealth {
        if conns.is_empty() {
            return PoolHealth::Excellent;
        }

        let mut healthy = 0usize;
        let mut degraded = 0usize;
        let mut failed = 0usize;

        for conn in conns.iter_mut() {
            match self.classify(conn) {
                ConnectionHealth::Healthy => healthy += 1,
                ConnectionHealth::Degraded => degraded += 1,
                ConnectionHealth::Repairing => degraded += 1,
                ConnectionHealth::Failed => {
                    failed += 1;
                    self.try_repair(conn).await;
                }
            }
        }

        let total = conns.len() as f64;
        let healthy_ratio = healthy as f64 / total;
        let failed_ratio = failed as f64 / total;

        let health = if failed_ratio > 0.5 {
            PoolHealth::Poor
        } else if failed_ratio > 0.0 || degraded as f64 / total > 0.3 {
            PoolHealth::Degraded
        } else if healthy_ratio == 1.0 {
            PoolHealth::Excellent
        } else if healthy_ratio >= 0.8 {
            PoolHealth::Good
        } else {
            PoolHealth::Fair
        };

        tracing::debug!(healthy, degraded, failed, ?health, "health check pass complete");
        health
    }

    async fn try_repair(&self, conn: &mut Connection<T>) {
        let attempts = {
            let mut map = self.repair_attempts.lock().unwrap();
            map.entry(conn.id).or_insert_with(|| AtomicU32::new(0)).load(Ordering::SeqCst)
        };

        if attempts >= self.config.max_repair_attempts {
            tracing::warn!(id = conn.id, "repair budget exhausted, leaving connection failed");
            return;
        }

        {
            let map = self.repair_attempts.lock().unwrap();
            map.get(&conn.id).unwrap().fetch_add(1, Ordering::SeqCst);
        }

        match self.manager.reconnect(conn).await {
            Ok(()) => {
                let mut map = self.repair_attempts.lock().unwrap();
                map.remove(&conn.id);
                tracing::info!(id = conn.id, "repair succeeded");
            }
            Err(err) => {
                tracing::warn!(id = conn.id, kind = %err.kind, "repair attempt failed");
            }
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.config.check_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::error::{Error, ErrorKind};
    use crate::metrics::NoopMetrics;
    use crate::transport::mock::{MockScript, MockTransport, ScriptedOutcome};
    use std::sync::Arc;

    fn monitor(host: &str) -> HealthMonitor<MockTransport> {
        let config = ConnectionConfig::builder(host, 21).build().unwrap();
        let manager = ConnectionManager::new(config, Arc::new(NoopMetrics));
        HealthMonitor::new(HealthConfig::default(), manager)
    }

    fn healthy_connection(host: &str) -> Connection<MockTransport> {
        let mut conn = Connection::new(host.to_string(), 21);
        conn.state = ConnectionState::Connected;
        conn
    }

    #[tokio::test]
    async fn classifies_healthy_connection_as_healthy() {
        let mon = monitor("health-ok");
        let conn = healthy_connection("health-ok");
        assert_eq!(mon.classify(&conn), ConnectionHealth::Healthy);
    }

    #[tokio::test]
    async fn classifies_above_warning_threshold_as_degraded() {
        let mon = monitor("health-degraded");
        let mut conn = healthy_connection("health-degraded");
        for _ in 0..2 {
            conn.record_error(Error::new(ErrorKind::ConnectionClosed, "blip"));
        }
        assert_eq!(mon.classify(&conn), ConnectionHealth::Degraded);
    }

    #[tokio::test]
    async fn classifies_disconnected_as_failed() {
        let mon = monitor("health-failed");
        let mut conn = healthy_connection("health-failed");
        conn.state = ConnectionState::Failed;
        assert_eq!(mon.classify(&conn), ConnectionHealth::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn check_attempts_repair_on_failed_connection() {
        MockScript::new().register("health-repair");
        let mon = monitor("health-repair");
        let mut conn = healthy_connection("health-repair");
        conn.state = ConnectionState::Failed;

        let health = mon.check(std::slice::from_mut(&mut conn)).await;
        assert_eq!(conn.state, ConnectionState::Connected);
        assert!(matches!(health, PoolHealth::Poor));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_repair_failure_respects_budget() {
        // Each repair episode exhausts the manager's own 5-attempt
        // reconnect budget before it gives up, so 3 health-monitor-level
        // repair episodes consume 15 failing dial attempts in total.
        let script = MockScript::new();
        for _ in 0..15 {
            script.queue_connect(ScriptedOutcome::ConnectFails(ErrorKind::ConnectionRefused));
        }
        script.register("health-repair-exhausted");
        let mon = monitor("health-repair-exhausted");
        let mut conn = healthy_connection("health-repair-exhausted");
        conn.state = ConnectionState::Failed;

        for _ in 0..5 {
            conn.state = ConnectionState::Failed;
            mon.check(std::slice::from_mut(&mut conn)).await;
        }

        let attempts = mon.repair_attempts.lock().unwrap().get(&conn.id).map(|a| a.load(Ordering::SeqCst));
        assert_eq!(attempts, Some(3));
    }

    #[tokio::test]
    async fn empty_connection_set_is_excellent() {
        let mon = monitor("health-empty");
        let health = mon.check(&mut []).await;
        assert_eq!(health, PoolHealth::Excellent);
    }
}
