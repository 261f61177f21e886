//! Pure mapping from a raised error (and an optional FTP reply code) to an
//! [`ErrorKind`]. Stateless and side-effect free so it is cheap to call on
//! every failure and trivial to test exhaustively.

use crate::error::ErrorKind;

/// Classifies a failure using the FTP reply code first (when present) and
/// falling back to substring matching on the error text. Rules are
/// evaluated in order; the first match wins, mirroring the precedence table
/// in the specification.
pub fn classify(message: &str, reply_code: Option<u16>) -> Option<ErrorKind> {
    if let Some(code) = reply_code {
        if let Some(kind) = classify_reply_code(code) {
            return kind;
        }
    }

    Some(classify_text(message))
}

/// Returns `None` when the code indicates success (2xx/3xx, "no error"),
/// `Some(kind)` otherwise. The outer `Option` distinguishes "not an error at
/// all" from "classified as `Unexpected`".
fn classify_reply_code(code: u16) -> Option<Option<ErrorKind>> {
    match code {
        200..=299 | 300..=399 => Some(None),
        550 => Some(Some(ErrorKind::FileNotFound)),
        530 | 532 => Some(Some(ErrorKind::AuthenticationError)),
        551 | 552 => Some(Some(ErrorKind::InsufficientStorage)),
        553 => Some(Some(ErrorKind::InvalidPath)),
        501 | 502 | 504 => Some(Some(ErrorKind::CommandNotSupported)),
        503 => Some(Some(ErrorKind::InvalidSequence)),
        400..=499 => Some(Some(ErrorKind::TemporaryError)),
        500..=599 => Some(Some(ErrorKind::ServerError)),
        _ => None,
    }
}

fn classify_text(message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("refused") {
        ErrorKind::ConnectionRefused
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ErrorKind::ConnectionTimeout
    } else if lower.contains("reset")
        || lower.contains("broken pipe")
        || lower.contains("closed")
        || lower.contains("end of stream")
    {
        ErrorKind::ConnectionClosed
    } else if lower.contains("login") || lower.contains("authentication") {
        ErrorKind::AuthenticationError
    } else {
        ErrorKind::Unexpected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_codes_classify_as_no_error() {
        assert_eq!(classify("ok", Some(200)), None);
        assert_eq!(classify("ok", Some(226)), None);
        assert_eq!(classify("pending", Some(350)), None);
    }

    #[test]
    fn reply_code_precedence_table() {
        assert_eq!(classify("x", Some(421)), Some(ErrorKind::TemporaryError));
        assert_eq!(classify("x", Some(550)), Some(ErrorKind::FileNotFound));
        assert_eq!(classify("x", Some(530)), Some(ErrorKind::AuthenticationError));
        assert_eq!(classify("x", Some(532)), Some(ErrorKind::AuthenticationError));
        assert_eq!(classify("x", Some(551)), Some(ErrorKind::InsufficientStorage));
        assert_eq!(classify("x", Some(552)), Some(ErrorKind::InsufficientStorage));
        assert_eq!(classify("x", Some(553)), Some(ErrorKind::InvalidPath));
        assert_eq!(classify("x", Some(501)), Some(ErrorKind::CommandNotSupported));
        assert_eq!(classify("x", Some(502)), Some(ErrorKind::CommandNotSupported));
        assert_eq!(classify("x", Some(504)), Some(ErrorKind::CommandNotSupported));
        assert_eq!(classify("x", Some(503)), Some(ErrorKind::InvalidSequence));
        assert_eq!(classify("x", Some(500)), Some(ErrorKind::ServerError));
        assert_eq!(classify("x", Some(451)), Some(ErrorKind::TemporaryError));
    }

    #[test]
    fn text_fallback_when_no_reply_code() {
        assert_eq!(classify("Connection refused", None), Some(ErrorKind::ConnectionRefused));
        assert_eq!(classify("operation timed out", None), Some(ErrorKind::ConnectionTimeout));
        assert_eq!(classify("read timeout", None), Some(ErrorKind::ConnectionTimeout));
        assert_eq!(classify("connection reset by peer", None), Some(ErrorKind::ConnectionClosed));
        assert_eq!(classify("broken pipe", None), Some(ErrorKind::ConnectionClosed));
        assert_eq!(classify("socket closed", None), Some(ErrorKind::ConnectionClosed));
        assert_eq!(classify("unexpected end of stream", None), Some(ErrorKind::ConnectionClosed));
        assert_eq!(classify("login incorrect", None), Some(ErrorKind::AuthenticationError));
        assert_eq!(classify("authentication failed", None), Some(ErrorKind::AuthenticationError));
        assert_eq!(classify("gremlins ate the socket", None), Some(ErrorKind::Unexpected));
    }

    #[test]
    fn classifying_same_pair_twice_is_stable() {
        let a = classify("connection refused", Some(421));
        let b = classify("connection refused", Some(421));
        assert_eq!(a, b);
    }

    #[test]
    fn reply_code_5xx_other_than_listed_is_server_error() {
        assert_eq!(classify("x", Some(599)), Some(ErrorKind::ServerError));
    }
}
