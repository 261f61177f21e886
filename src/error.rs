//! Error taxonomy shared across the pool, the connection manager, and the
//! retry/circuit-breaker layer.
//!
//! The source material this crate generalizes from (r2d2/bb8) represents
//! failures as a single associated `Error` type per `ManageConnection`
//! implementor. An FTP session can fail in many semantically distinct ways
//! (auth rejected, server full, file missing, transient network blip) and
//! callers need to tell those apart to decide whether to retry. We collapse
//! that into one flat struct carrying a stable `ErrorKind` tag rather than a
//! hierarchy of exception types.

use std::fmt;

/// Stable classification of every failure this crate can produce or observe
/// from the wire. Recoverability is a property of the kind, not of the call
/// site, so it lives here rather than being re-decided at each usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionRefused,
    ConnectionTimeout,
    ConnectionClosed,
    AuthenticationError,
    ServerError,
    TemporaryError,
    FileNotFound,
    PermissionDenied,
    InsufficientStorage,
    InvalidSequence,
    CommandNotSupported,
    InvalidPath,
    ValidationError,
    PoolExhausted,
    CircuitOpen,
    Unexpected,
}

impl ErrorKind {
    /// Whether an operation that failed with this kind may succeed on a
    /// later attempt without operator intervention.
    pub fn recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionTimeout
                | ErrorKind::ConnectionClosed
                | ErrorKind::TemporaryError
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::ConnectionTimeout => "connection_timeout",
            ErrorKind::ConnectionClosed => "connection_closed",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::TemporaryError => "temporary_error",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InsufficientStorage => "insufficient_storage",
            ErrorKind::InvalidSequence => "invalid_sequence",
            ErrorKind::CommandNotSupported => "command_not_supported",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type raised anywhere in this crate. Specialization is
/// data (the fields below), not a type hierarchy.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub reply_code: Option<u16>,
    pub path: Option<String>,
    pub bytes_transferred: Option<u64>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            reply_code: None,
            path: None,
            bytes_transferred: None,
            cause: None,
        }
    }

    pub fn with_reply_code(mut self, code: u16) -> Self {
        self.reply_code = Some(code);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_bytes_transferred(mut self, bytes: u64) -> Self {
        self.bytes_transferred = Some(bytes);
        self
    }

    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn recoverable(&self) -> bool {
        self.kind.recoverable()
    }

    pub fn pool_exhausted() -> Self {
        Error::new(ErrorKind::PoolExhausted, "no connection available before max-wait elapsed")
    }

    pub fn circuit_open(name: &str) -> Self {
        Error::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker '{name}' is open"),
        )
    }

    /// Emits a single structured log event for an error escaping the core,
    /// at the severity appropriate to its kind. Callers invoke this exactly
    /// once, at the point where the error leaves pool/retry machinery.
    pub fn log_escape(&self) {
        match self.kind {
            ErrorKind::PoolExhausted | ErrorKind::CircuitOpen => {
                tracing::warn!(
                    kind = %self.kind,
                    message = %self.message,
                    reply_code = ?self.reply_code,
                    path = ?self.path,
                    "operation failed"
                );
            }
            _ if self.kind.recoverable() => {
                tracing::warn!(
                    kind = %self.kind,
                    message = %self.message,
                    reply_code = ?self.reply_code,
                    "operation failed after retries exhausted"
                );
            }
            _ => {
                tracing::error!(
                    kind = %self.kind,
                    message = %self.message,
                    reply_code = ?self.reply_code,
                    path = ?self.path,
                    bytes_transferred = ?self.bytes_transferred,
                    "operation failed"
                );
            }
        }
    }
}
