//! # Synchronization Error Types
//!
//! All errors that can occur in the synchronization engine. Runtime
//! desynchronization is deliberately NOT here: drift self-heals through
//! the correction tiers and is never reported as an error.

use thiserror::Error;

/// Errors raised at the protocol boundary before data reaches the engine.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Wire tag byte does not name any known message.
    #[error("unknown wire tag: {0:#04x}")]
    UnknownTag(u8),

    /// Facing discriminant does not name any known direction.
    #[error("unknown facing discriminant: {0}")]
    UnknownFacing(u8),

    /// Reject-reason discriminant does not name any known reason.
    #[error("unknown reject reason: {0}")]
    UnknownReason(u8),

    /// Payload length does not match the tagged message's layout.
    #[error("bad payload length: expected {expected} bytes, got {got}")]
    BadLength {
        /// Bytes the tagged layout requires.
        expected: usize,
        /// Bytes actually received.
        got: usize,
    },
}

/// Errors that can occur in the synchronization engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The server refused the join request.
    #[error("join rejected by server: {reason}")]
    HandshakeRejected {
        /// Reason the server gave, verbatim.
        reason: String,
    },

    /// Transport dropped before the session became ready.
    #[error("transport closed during handshake")]
    TransportClosed,

    /// No ready signal arrived within the caller's deadline.
    #[error("handshake timed out after {waited_ms} ms")]
    HandshakeTimeout {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The session was torn down while a handshake was pending.
    #[error("session closed")]
    SessionClosed,

    /// Outbound transmit failed at the transport boundary.
    #[error("transmit failed: {0}")]
    TransmitFailed(String),

    /// Inbound bytes failed protocol validation.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_converts() {
        let err: SyncError = ProtocolError::UnknownTag(0xff).into();
        assert_eq!(err, SyncError::Protocol(ProtocolError::UnknownTag(0xff)));
    }

    #[test]
    fn test_error_messages_are_stable() {
        let err = SyncError::HandshakeRejected {
            reason: "room full".to_string(),
        };
        assert_eq!(err.to_string(), "join rejected by server: room full");
        let err = ProtocolError::BadLength {
            expected: 24,
            got: 7,
        };
        assert_eq!(
            err.to_string(),
            "bad payload length: expected 24 bytes, got 7"
        );
    }
}
