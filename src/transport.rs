//! The wire-level FTP primitive this crate builds on top of. Per the
//! specification's non-goals, the FTP protocol itself (RFC 959 + RFC 4217)
//! is not reimplemented here — [`FtpTransport`] is a thin seam over an
//! existing async FTP client library so the connection-lifecycle state
//! machine and error mapping in [`crate::manager`] stay independent of
//! which concrete crate speaks the wire.

use async_trait::async_trait;

use crate::config::{ConnectionConfig, TransferMode};
use crate::error::{Error, ErrorKind};

/// A live (or attempting-to-be-live) FTP control session.
///
/// Implementors own exactly one underlying socket. `noop` must map a
/// non-2xx reply to `Err` rather than panicking; `quit` must tolerate the
/// server having already closed the socket.
#[async_trait]
pub trait FtpTransport: Send + Sync + 'static {
    /// Dials, authenticates, and applies the data-mode/transfer-mode
    /// settings from `config`. On any failure the transport must have
    /// already released its own resources before returning.
    async fn connect(config: &ConnectionConfig) -> Result<Self, Error>
    where
        Self: Sized;

    /// Sends NOOP and returns `Ok(())` only for a 2xx reply.
    async fn noop(&mut self) -> Result<(), Error>;

    /// Polite logout followed by disconnect. Idempotent: calling it on an
    /// already-closed session is not an error.
    async fn quit(&mut self);
}

/// Production [`FtpTransport`] backed by `suppaftp`'s asynchronous client.
pub struct SuppaFtpTransport {
    stream: suppaftp::AsyncNativeTlsFtpStream,
}

#[async_trait]
impl FtpTransport for SuppaFtpTransport {
    async fn connect(config: &ConnectionConfig) -> Result<Self, Error> {
        let addr = format!("{}:{}", config.host, config.port);

        let connect_fut = suppaftp::AsyncNativeTlsFtpStream::connect(&addr);
        let mut stream = tokio::time::timeout(config.connect_timeout, connect_fut)
            .await
            .map_err(|_| Error::new(ErrorKind::ConnectionTimeout, format!("dial {addr} timed out")))?
            .map_err(|e| classify_dial_error(&addr, e))?;

        if config.tls_mode == crate::config::TlsMode::Explicit {
            stream = stream
                .into_secure(
                    suppaftp::AsyncNativeTlsConnector::from(
                        suppaftp::async_native_tls::TlsConnector::new(),
                    ),
                    &config.host,
                )
                .await
                .map_err(|e| {
                    Error::new(ErrorKind::ConnectionClosed, format!("explicit TLS upgrade failed: {e}"))
                })?;
        }

        stream
            .login(config.username.as_str(), config.password.expose())
            .await
            .map_err(|e| {
                Error::new(ErrorKind::AuthenticationError, format!("login refused: {e}"))
            })?;

        if config.active_mode {
            stream.set_mode(suppaftp::Mode::Active);
        } else {
            stream.set_mode(suppaftp::Mode::Passive);
        }

        match config.transfer_mode {
            TransferMode::Ascii => stream
                .transfer_type(suppaftp::types::FileType::Ascii(
                    suppaftp::types::FormatControl::Default,
                ))
                .await
                .map_err(|e| Error::new(ErrorKind::Unexpected, format!("TYPE A failed: {e}")))?,
            TransferMode::Binary => stream
                .transfer_type(suppaftp::types::FileType::Binary)
                .await
                .map_err(|e| Error::new(ErrorKind::Unexpected, format!("TYPE I failed: {e}")))?,
        };

        Ok(SuppaFtpTransport { stream })
    }

    async fn noop(&mut self) -> Result<(), Error> {
        self.stream
            .noop()
            .await
            .map_err(|e| Error::new(ErrorKind::ConnectionClosed, format!("NOOP failed: {e}")))
    }

    async fn quit(&mut self) {
        let _ = self.stream.quit().await;
    }
}

fn classify_dial_error(addr: &str, err: suppaftp::FtpError) -> Error {
    let text = err.to_string();
    let lower = text.to_ascii_lowercase();
    let kind = if lower.contains("refused") {
        ErrorKind::ConnectionRefused
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ErrorKind::ConnectionTimeout
    } else {
        ErrorKind::ConnectionClosed
    };
    Error::new(kind, format!("dial {addr} failed: {text}"))
}
