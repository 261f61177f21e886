//! [`ConnectionManager`]: creates, validates, closes, and reconnects
//! [`Connection`]s, and runs the periodic maintenance sweep. This is the
//! generalization of `bb8::ManageConnection` from a single
//! `connect`/`is_valid`/`has_broken` triad into the richer FTP-specific
//! lifecycle the specification calls for (explicit state machine,
//! bounded-attempt reconnect with a fixed backoff table, idle+keep-alive
//! sweep).

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::{Error, ErrorKind};
use crate::metrics::Metrics;
use crate::transport::FtpTransport;

/// Fixed reconnect backoff table, preserved verbatim per the specification's
/// fidelity note rather than made configurable.
const RECONNECT_BACKOFF: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Owns the FTP target configuration and mediates every lifecycle
/// transition for [`Connection`]s drawn against it. Stateless beyond the
/// config and an injected [`Metrics`] sink — it holds no registry of its
/// own; the pool is the registry.
pub struct ConnectionManager<T: FtpTransport> {
    config: ConnectionConfig,
    metrics: Arc<dyn Metrics>,
    _transport: PhantomData<T>,
}

impl<T: FtpTransport> ConnectionManager<T> {
    pub fn new(config: ConnectionConfig, metrics: Arc<dyn Metrics>) -> Self {
        ConnectionManager {
            config,
            metrics,
            _transport: PhantomData,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Establishes the channel, logs in, and configures data/transfer mode.
    /// The returned `Connection` is in state `Connected`.
    pub async fn create(&self) -> Result<Connection<T>, Error> {
        tracing::debug!(host = %self.config.host, port = self.config.port, "dialing FTP connection");
        let mut conn = Connection::new(self.config.host.clone(), self.config.port);

        match T::connect(&self.config).await {
            Ok(session) => {
                conn.session = Some(session);
                conn.state = ConnectionState::Connected;
                tracing::debug!(id = conn.id, "FTP connection established");
                Ok(conn)
            }
            Err(err) => {
                conn.state = ConnectionState::Failed;
                tracing::warn!(host = %self.config.host, kind = %err.kind, "dial failed");
                Err(err)
            }
        }
    }

    /// Sends NOOP. Returns `Ok(true)` for a live connection, `Ok(false)` for
    /// an ordinary validation failure (the connection is marked `Failed` and
    /// the error recorded in its ring); returns `Err` only for a
    /// programmer-error precondition violation (null/already-disconnected).
    pub async fn validate(&self, conn: &mut Connection<T>) -> Result<bool, Error> {
        if conn.state.is_terminal() {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "cannot validate an already-disconnected connection",
            ));
        }
        conn.touch_tested();
        let Some(session) = conn.session.as_mut() else {
            return Err(Error::new(ErrorKind::ValidationError, "connection has no active session"));
        };

        match session.noop().await {
            Ok(()) => {
                conn.state = ConnectionState::Connected;
                Ok(true)
            }
            Err(err) => {
                conn.state = ConnectionState::Failed;
                conn.record_error(err);
                Ok(false)
            }
        }
    }

    /// Attempts to bring a `Failed`/`Disconnected` connection back to
    /// `Connected`, sleeping through the fixed backoff table between
    /// attempts. Fails with a non-recoverable error after
    /// `MAX_RECONNECT_ATTEMPTS` attempts in this failure episode.
    pub async fn reconnect(&self, conn: &mut Connection<T>) -> Result<(), Error> {
        if !matches!(conn.state, ConnectionState::Failed | ConnectionState::Disconnected) {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "reconnect is only permitted from Failed or Disconnected",
            ));
        }

        conn.state = ConnectionState::Reconnecting;

        loop {
            if conn.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
                conn.state = ConnectionState::Failed;
                return Err(Error::new(
                    ErrorKind::Unexpected,
                    format!("exceeded {MAX_RECONNECT_ATTEMPTS} reconnect attempts"),
                ));
            }

            let backoff_index = (conn.reconnect_attempts as usize).min(RECONNECT_BACKOFF.len() - 1);
            let backoff = RECONNECT_BACKOFF[backoff_index];
            conn.reconnect_attempts += 1;
            tokio::time::sleep(backoff).await;

            if let Some(session) = conn.session.as_mut() {
                session.quit().await;
                conn.session = None;
            }

            match T::connect(&self.config).await {
                Ok(session) => {
                    conn.session = Some(session);
                    conn.state = ConnectionState::Connected;
                    conn.reset_reconnect_attempts();
                    tracing::info!(id = conn.id, "reconnect succeeded");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(id = conn.id, attempt = conn.reconnect_attempts, kind = %err.kind, "reconnect attempt failed");
                    conn.record_error(err);
                    conn.state = ConnectionState::Reconnecting;
                }
            }
        }
    }

    /// Idempotent close: tolerates a connection that has no live session.
    pub async fn close(&self, conn: &mut Connection<T>) {
        if conn.state.is_terminal() {
            return;
        }
        conn.state = ConnectionState::Disconnecting;
        if let Some(mut session) = conn.session.take() {
            session.quit().await;
        }
        conn.state = ConnectionState::Disconnected;
        self.metrics.record_destroy();
        tracing::debug!(id = conn.id, "connection closed");
    }

    /// The interval at which the maintenance sweep should run:
    /// `min(idle-timeout/2, keep-alive-interval)`, lower-bounded at 1s, with
    /// a zero input disabling that side of the `min` rather than collapsing
    /// the whole expression to zero (the pinned resolution of the source's
    /// ambiguous guard).
    pub fn sweep_interval(&self) -> Duration {
        let idle_half = non_zero(self.config.connection_idle_timeout / 2);
        let keep_alive = non_zero(self.config.keep_alive_interval);

        let interval = match (idle_half, keep_alive) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => Duration::from_secs(30),
        };

        interval.max(Duration::from_secs(1))
    }

    /// One sweep pass over `conns`: closes connections idle past
    /// `connection_idle_timeout` and validates connections whose
    /// time-since-last-test exceeds `keep_alive_interval`. Only acts on
    /// connections in a usable state.
    pub async fn sweep(&self, conns: &Mutex<Vec<Connection<T>>>) {
        let now = tokio::time::Instant::now();
        let mut guard = conns.lock().await;

        let mut to_close = Vec::new();
        for (idx, conn) in guard.iter().enumerate() {
            if !conn.state.is_usable() {
                continue;
            }
            if !self.config.connection_idle_timeout.is_zero()
                && conn.idle_for(now) > self.config.connection_idle_timeout
            {
                to_close.push(idx);
            }
        }

        for &idx in to_close.iter().rev() {
            let mut conn = guard.remove(idx);
            drop(guard);
            self.close(&mut conn).await;
            guard = conns.lock().await;
        }

        if !self.config.keep_alive_interval.is_zero() {
            for conn in guard.iter_mut() {
                if conn.state.is_usable() && conn.since_last_test(now) > self.config.keep_alive_interval {
                    let _ = self.validate(conn).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use crate::transport::mock::{MockScript, MockTransport, ScriptedOutcome};

    fn manager(host: &str) -> ConnectionManager<MockTransport> {
        let config = ConnectionConfig::builder(host, 21)
            .username("anonymous")
            .password("anonymous@")
            .build()
            .unwrap();
        ConnectionManager::new(config, Arc::new(NoopMetrics))
    }

    #[tokio::test]
    async fn create_succeeds_and_marks_connected() {
        MockScript::new().register("create-ok");
        let mgr = manager("create-ok");
        let conn = mgr.create().await.unwrap();
        assert_eq!(conn.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn create_failure_maps_login_refusal_to_failed_state() {
        MockScript::new()
            .queue_connect(ScriptedOutcome::ConnectFails(ErrorKind::AuthenticationError))
            .register("create-auth-fail");
        let mgr = manager("create-auth-fail");
        let err = mgr.create().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationError);
    }

    #[tokio::test]
    async fn validate_false_on_noop_failure_without_raising() {
        MockScript::new()
            .queue_noop(ScriptedOutcome::NoopFails(ErrorKind::ConnectionClosed))
            .register("validate-fail");
        let mgr = manager("validate-fail");
        let mut conn = mgr.create().await.unwrap();

        let ok = mgr.validate(&mut conn).await.unwrap();
        assert!(!ok);
        assert_eq!(conn.state, ConnectionState::Failed);
        assert_eq!(conn.last_errors.len(), 1);
    }

    #[tokio::test]
    async fn validate_raises_on_disconnected_connection() {
        MockScript::new().register("validate-disconnected");
        let mgr = manager("validate-disconnected");
        let mut conn = mgr.create().await.unwrap();
        mgr.close(&mut conn).await;

        let err = mgr.validate(&mut conn).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resets_attempts_on_success() {
        let script = MockScript::new();
        script
            .queue_connect(ScriptedOutcome::Ok)
            .queue_connect(ScriptedOutcome::ConnectFails(ErrorKind::ConnectionRefused))
            .register("reconnect-ok");
        let mgr = manager("reconnect-ok");
        let mut conn = mgr.create().await.unwrap();
        conn.state = ConnectionState::Failed;

        mgr.reconnect(&mut conn).await.unwrap();
        assert_eq!(conn.state, ConnectionState::Connected);
        assert_eq!(conn.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_five_attempts() {
        let script = MockScript::new();
        for _ in 0..5 {
            script.queue_connect(ScriptedOutcome::ConnectFails(ErrorKind::ConnectionRefused));
        }
        script.register("reconnect-exhausted");
        let mgr = manager("reconnect-exhausted");
        let mut conn = mgr.create().await.unwrap();
        conn.state = ConnectionState::Failed;

        let err = mgr.reconnect(&mut conn).await.unwrap_err();
        assert!(!err.recoverable());
        assert_eq!(conn.reconnect_attempts, MAX_RECONNECT_ATTEMPTS);
    }

    #[test]
    fn sweep_interval_guards_zero_inputs() {
        let config = ConnectionConfig::builder("h", 21)
            .keep_alive_interval(Duration::from_secs(0))
            .connection_idle_timeout(Duration::from_secs(0))
            .build()
            .unwrap();
        let mgr: ConnectionManager<MockTransport> = ConnectionManager::new(config, Arc::new(NoopMetrics));
        assert_eq!(mgr.sweep_interval(), Duration::from_secs(30));

        let config = ConnectionConfig::builder("h", 21)
            .keep_alive_interval(Duration::from_secs(10))
            .connection_idle_timeout(Duration::from_secs(0))
            .build()
            .unwrap();
        let mgr: ConnectionManager<MockTransport> = ConnectionManager::new(config, Arc::new(NoopMetrics));
        assert_eq!(mgr.sweep_interval(), Duration::from_secs(10));

        let config = ConnectionConfig::builder("h", 21)
            .keep_alive_interval(Duration::from_secs(0))
            .connection_idle_timeout(Duration::from_secs(4))
            .build()
            .unwrap();
        let mgr: ConnectionManager<MockTransport> = ConnectionManager::new(config, Arc::new(NoopMetrics));
        assert_eq!(mgr.sweep_interval(), Duration::from_secs(2));
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}
