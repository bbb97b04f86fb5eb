// ABOUTME: Client error surface covering protocol, transport, queue and lifecycle failures
// ABOUTME: Every kind is distinct at the type level so callers and interceptors can branch on it

use crate::codec::CodecError;
use crate::frame::leading_token;
use std::io;
use thiserror::Error;

/// Comprehensive error type for client operations.
///
/// Reply futures resolve with this on their error branch; interceptors see
/// every kind uniformly. The type is `Clone` because a fatal endpoint error
/// fans out to every reply slot still in flight on that endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RespError {
    /// Malformed wire bytes. Fatal to the endpoint that produced them.
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// An Error frame returned by the server. Non-fatal; the category is
    /// the leading token of the message (`WRONGTYPE`, `NOAUTH`, ...).
    #[error("server error [{category}]: {message}")]
    Server { category: String, message: String },

    /// Socket read/write failure, EOF mid-frame, or handshake failure.
    /// Fatal to the endpoint.
    #[error("transport error ({kind:?}): {message}")]
    Transport { kind: io::ErrorKind, message: String },

    /// No reply within `command_timeout`. Non-fatal to the endpoint: the
    /// reply slot remains, and the late reply is discarded when it arrives.
    #[error("command timed out")]
    Timeout,

    /// Caller-requested cancellation. Post-write, same discard semantics as
    /// `Timeout`.
    #[error("submission cancelled")]
    Cancelled,

    /// Submission rejected immediately under the `Reject` full mode.
    #[error("submission queue is full")]
    QueueFull,

    /// Evicted from a full queue under the `DropOldest` full mode.
    #[error("dropped from a full submission queue")]
    Dropped,

    /// No endpoint reached Ready within `acquire_timeout`.
    #[error("no healthy endpoint available")]
    NoHealthyEndpoint,

    /// Submission after the client was shut down.
    #[error("client has been disposed")]
    Disposed,

    /// A well-formed reply whose shape does not match the command (e.g. an
    /// array where an integer was expected). Non-fatal; raised by the typed
    /// convenience wrappers, never by the wire layer.
    #[error("unexpected reply to {command}: {got}")]
    UnexpectedReply { command: &'static str, got: String },
}

impl RespError {
    /// Build the server-error kind from an Error frame's message bytes.
    pub fn from_error_frame(message: &[u8]) -> RespError {
        RespError::Server {
            category: String::from_utf8_lossy(leading_token(message)).into_owned(),
            message: String::from_utf8_lossy(message).into_owned(),
        }
    }

    /// The server error category, when this is a server error.
    pub fn category(&self) -> Option<&str> {
        match self {
            RespError::Server { category, .. } => Some(category),
            _ => None,
        }
    }

    /// Whether this error faults the endpoint it occurred on, fanning out
    /// to every in-flight reply slot.
    pub fn is_fatal_to_endpoint(&self) -> bool {
        matches!(self, RespError::Protocol(_) | RespError::Transport { .. })
    }
}

impl From<io::Error> for RespError {
    fn from(err: io::Error) -> RespError {
        RespError::Transport {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for client operations.
pub type RespResult<T> = Result<T, RespError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_splits_category() {
        let err = RespError::from_error_frame(b"WRONGTYPE Operation against a key");
        assert_eq!(err.category(), Some("WRONGTYPE"));
        match err {
            RespError::Server { message, .. } => {
                assert_eq!(message, "WRONGTYPE Operation against a key");
            }
            other => panic!("unexpected error kind: {other:?}"),
        }

        // A bare category with no message body still parses.
        let err = RespError::from_error_frame(b"NOAUTH");
        assert_eq!(err.category(), Some("NOAUTH"));
    }

    #[test]
    fn fatality_classification() {
        assert!(RespError::Protocol(CodecError::DepthExceeded).is_fatal_to_endpoint());
        assert!(
            RespError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
                .is_fatal_to_endpoint()
        );
        assert!(!RespError::Timeout.is_fatal_to_endpoint());
        assert!(!RespError::from_error_frame(b"ERR nope").is_fatal_to_endpoint());
        assert!(!RespError::Dropped.is_fatal_to_endpoint());
    }
}
