//! Error types for probe sessions.
//!
//! Every fault is local to one connection and one operation. The responder
//! logs it and keeps accepting; the initiator aborts its remaining sequence.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while running a probe operation.
#[derive(Error, Debug)]
pub enum Error {
    /// An unexpected token arrived at a handshake point.
    #[error("protocol violation: expected {expected}, got {got:?}")]
    ProtocolViolation { expected: String, got: String },

    /// The stream ended before the expected byte count.
    #[error("peer closed the connection during {stage} ({transferred} of {expected} bytes)")]
    PeerClosed {
        stage: &'static str,
        transferred: u64,
        expected: u64,
    },

    /// A bounded wait for the peer elapsed.
    #[error("transfer stalled waiting for {waiting_for} ({timeout:?})")]
    TransferStalled {
        waiting_for: &'static str,
        timeout: Duration,
    },

    /// Underlying connect/bind/accept/read/write failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl Error {
    pub(crate) fn violation(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub(crate) fn stalled(waiting_for: &'static str, timeout: Duration) -> Self {
        Error::TransferStalled {
            waiting_for,
            timeout,
        }
    }

    pub(crate) fn closed(stage: &'static str, transferred: u64, expected: u64) -> Self {
        Error::PeerClosed {
            stage,
            transferred,
            expected,
        }
    }

    /// Attach transfer progress to an error, treating a reset or broken pipe
    /// as the peer hanging up.
    pub(crate) fn at(self, stage: &'static str, transferred: u64, expected: u64) -> Self {
        match self {
            Error::Transport(err) if is_hangup(&err) => {
                Error::closed(stage, transferred, expected)
            }
            Error::PeerClosed { .. } => Error::closed(stage, transferred, expected),
            other => other,
        }
    }

    /// True when the fault means the peer is gone.
    pub fn is_peer_closed(&self) -> bool {
        match self {
            Error::PeerClosed { .. } => true,
            Error::Transport(err) => is_hangup(err),
            _ => false,
        }
    }
}

fn is_hangup(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
            | io::ErrorKind::NotConnected
    )
}

/// Result type alias for probe operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_maps_to_peer_closed() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        let err = Error::from(reset).at("download", 10, 20);
        assert!(matches!(
            err,
            Error::PeerClosed {
                stage: "download",
                transferred: 10,
                expected: 20
            }
        ));
    }

    #[test]
    fn test_other_io_stays_transport() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let err = Error::from(denied).at("upload", 0, 1);
        assert!(matches!(err, Error::Transport(_)));
        assert!(!err.is_peer_closed());
    }

    #[test]
    fn test_stall_is_kept() {
        let err = Error::stalled("ack", Duration::from_secs(1)).at("upload", 5, 10);
        assert!(matches!(err, Error::TransferStalled { waiting_for: "ack", .. }));
    }

    #[test]
    fn test_display() {
        let err = Error::violation("ready", "nope");
        assert_eq!(
            err.to_string(),
            "protocol violation: expected ready, got \"nope\""
        );

        let err = Error::closed("download", 4, 8);
        assert_eq!(
            err.to_string(),
            "peer closed the connection during download (4 of 8 bytes)"
        );
    }
}
