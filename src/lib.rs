//! A persistent, pooled FTP client runtime.
//!
//! Generalizes the bounded connection-pool pattern (a `ManageConnection`
//! plus a sized pool of what it manages) to a single FTP target, and adds
//! the pieces a long-lived FTP client needs beyond bare pooling: explicit
//! per-connection lifecycle, a background health monitor, a circuit
//! breaker, and a retry engine with pluggable recovery.
//!
//! ```no_run
//! use ftp_pool::{ConnectionConfig, ConnectionManager, FtpTransport, NoopMetrics, Pool, PoolConfig, SuppaFtpTransport};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), ftp_pool::Error> {
//! let config = ConnectionConfig::builder("ftp.example.com", 21)
//!     .username("anonymous")
//!     .password("anonymous@")
//!     .build()?;
//! let manager = ConnectionManager::<SuppaFtpTransport>::new(config, Arc::new(NoopMetrics));
//! let pool = Pool::new(manager, PoolConfig::builder().build()?, None);
//!
//! pool.with_connection(|session| Box::pin(async move { session.noop().await })).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit;
pub mod classifier;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod transport;

pub use circuit::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classifier::classify;
pub use config::{
    ConnectionConfig, ConnectionConfigBuilder, EvictionPolicy, Ordering, PoolConfig, PoolConfigBuilder, ProxyType,
    Secret, TlsMode, TransferMode,
};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{Error, ErrorKind};
pub use health::{ConnectionHealth, HealthConfig, HealthMonitor, PoolHealth};
pub use manager::ConnectionManager;
pub use metrics::{AtomicMetrics, Metrics, NoopMetrics, PoolMetricsSnapshot};
pub use pool::{Pool, PooledConnection};
pub use retry::{RetryEngine, RetryPolicy};
pub use transport::{FtpTransport, SuppaFtpTransport};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::circuit::CircuitBreakerConfig;
    use crate::transport::mock::{MockScript, MockTransport, ScriptedOutcome};
    use std::sync::Arc;
    use std::time::Duration;

    fn pool(host: &str, pool_config: PoolConfig) -> Pool<MockTransport> {
        let config = ConnectionConfig::builder(host, 21).build().unwrap();
        let metrics: Arc<dyn Metrics> = Arc::new(AtomicMetrics::new());
        let manager = ConnectionManager::new(config, metrics.clone());
        Pool::new(manager, pool_config, Some(metrics))
    }

    /// Scenario: a busy pool under concurrent load borrows and returns
    /// without ever exceeding `max-total` in-flight connections.
    #[tokio::test]
    async fn borrow_and_return_under_concurrent_load() {
        MockScript::new().register("itest-load");
        let p = pool("itest-load", PoolConfig::builder().max_total(4).build().unwrap());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                let conn = p.borrow().await.unwrap();
                tokio::task::yield_now().await;
                drop(conn);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    /// Scenario: a transient NOOP failure on borrow is absorbed by
    /// test-on-borrow discarding the dead connection and dialing a fresh
    /// one, without the caller observing an error.
    #[tokio::test]
    async fn transient_validation_failure_is_transparent_to_caller() {
        let script = MockScript::new();
        script.queue_noop(ScriptedOutcome::NoopFails(ErrorKind::ConnectionClosed));
        script.register("itest-transient");
        let p = pool(
            "itest-transient",
            PoolConfig::builder().max_total(2).test_on_borrow(true).build().unwrap(),
        );

        let conn = p.borrow().await.unwrap();
        drop(conn);
    }

    /// Scenario: the circuit trips after repeated dial failures, then
    /// recovers once the server starts accepting connections again.
    #[tokio::test(start_paused = true)]
    async fn circuit_trips_then_recovers() {
        let script = MockScript::new();
        for _ in 0..5 {
            script.queue_connect(ScriptedOutcome::ConnectFails(ErrorKind::ConnectionRefused));
        }
        script.register("itest-circuit");
        let p = pool("itest-circuit", PoolConfig::builder().max_total(3).build().unwrap());

        for _ in 0..CircuitBreakerConfig::default().failure_threshold {
            assert!(p.borrow().await.is_err());
        }

        let denied = p.borrow().await.unwrap_err();
        assert_eq!(denied.kind, ErrorKind::CircuitOpen);

        tokio::time::sleep(CircuitBreakerConfig::default().open_duration + Duration::from_millis(1)).await;

        let conn = p.borrow().await.unwrap();
        drop(conn);
    }

    /// Scenario: a caller blocked on an exhausted pool gives up after
    /// `max-wait` rather than hanging forever.
    #[tokio::test(start_paused = true)]
    async fn pool_exhaustion_respects_max_wait() {
        MockScript::new().register("itest-exhaustion");
        let p = pool(
            "itest-exhaustion",
            PoolConfig::builder()
                .max_total(1)
                .max_wait(Some(Duration::from_millis(50)))
                .build()
                .unwrap(),
        );

        let _held = p.borrow().await.unwrap();
        let err = p.borrow().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PoolExhausted);
    }

    /// Scenario: a connection idle past `connection-idle-timeout` is closed
    /// by the manager's maintenance sweep rather than handed out again.
    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_swept_by_manager() {
        MockScript::new().register("itest-idle-sweep");
        let config = ConnectionConfig::builder("itest-idle-sweep", 21)
            .connection_idle_timeout(Duration::from_millis(10))
            .build()
            .unwrap();
        let manager = ConnectionManager::<MockTransport>::new(config, Arc::new(NoopMetrics) as Arc<dyn Metrics>);

        let mut conn = manager.create().await.unwrap();
        conn.touch_used();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let conns = tokio::sync::Mutex::new(vec![conn]);
        manager.sweep(&conns).await;
        assert!(conns.lock().await.is_empty());
    }

    /// Scenario: a non-recoverable authentication error is never retried
    /// and propagates on the first attempt.
    #[tokio::test]
    async fn non_recoverable_error_is_not_retried() {
        let script = MockScript::new();
        script.queue_connect(ScriptedOutcome::ConnectFails(ErrorKind::AuthenticationError));
        script.register("itest-auth");
        let p = pool("itest-auth", PoolConfig::builder().max_total(2).build().unwrap());

        let err = p.borrow().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationError);
    }
}
