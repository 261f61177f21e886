//! [`Connection`]: a single FTP session plus the bookkeeping the pool and
//! health monitor need (timestamps, reconnect counter, bounded error
//! history). The state machine in [`ConnectionState`] mirrors the one in
//! the specification exactly; transitions outside the documented edges are
//! programmer errors caught by `debug_assert!` rather than silently allowed.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::error::Error;
use crate::transport::FtpTransport;

/// Monotonically increasing id, unique for the lifetime of the process.
pub type ConnectionId = u64;

fn next_connection_id() -> ConnectionId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle state of a [`Connection`]. See the module-level diagram in the
/// specification; `Connecting`/`Reconnecting`/`Disconnecting` are
/// transitional and not eligible for borrow or health-sweep validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Failed,
    Reconnecting,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    /// Usable from the pool's perspective: safe to hand out or validate.
    pub fn is_usable(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }
}

const LAST_ERROR_RING_CAPACITY: usize = 10;

/// Bounded ring buffer of recent failures for a connection, capped at 10
/// entries per the specification. Oldest entries fall off the front.
#[derive(Debug, Default)]
pub struct ErrorRing {
    entries: VecDeque<Error>,
}

impl ErrorRing {
    pub fn push(&mut self, error: Error) {
        if self.entries.len() == LAST_ERROR_RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(error);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&Error> {
        self.entries.back()
    }
}

/// A single FTP control session plus its lifecycle metadata. Owned by
/// exactly one of {pool idle registry, a single borrower, the connection
/// manager during maintenance} at any time — that invariant is enforced by
/// the pool's move semantics, not by this type.
pub struct Connection<T: FtpTransport> {
    pub id: ConnectionId,
    pub host: String,
    pub port: u16,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub last_tested_at: Instant,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_errors: ErrorRing,
    pub session: Option<T>,
}

impl<T: FtpTransport> Connection<T> {
    pub fn new(host: String, port: u16) -> Self {
        let now = Instant::now();
        Connection {
            id: next_connection_id(),
            host,
            port,
            created_at: now,
            last_used_at: now,
            last_tested_at: now,
            state: ConnectionState::Connecting,
            reconnect_attempts: 0,
            last_errors: ErrorRing::default(),
            session: None,
        }
    }

    pub fn record_error(&mut self, error: Error) {
        self.last_errors.push(error);
    }

    pub fn reset_reconnect_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }

    pub fn touch_used(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub fn touch_tested(&mut self) {
        self.last_tested_at = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    pub fn since_last_test(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_tested_at)
    }
}

impl<T: FtpTransport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.state)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish()
    }
}
