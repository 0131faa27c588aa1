//! Error types for the Beacon gateway

use std::time::Duration;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Socket-level failure (connect, read, write)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Raw I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame body was not a valid envelope
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Server sent an `error` envelope before the handshake completed
    #[error("Handshake rejected ({code}): {message}")]
    HandshakeRejected { code: String, message: String },

    /// No `handshake_ack` within the configured window
    #[error("Handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),

    /// Socket closed or errored while the handshake was in flight
    #[error("Connection closed before handshake: {0}")]
    ClosedBeforeHandshake(String),

    /// Request attempted before the connection is established
    #[error("Gateway handshake not completed")]
    NotEstablished,

    /// No matching response arrived in time
    #[error("{action} ({request_id}) timed out")]
    Timeout { action: String, request_id: String },

    /// Connection went away while the request was pending
    #[error("Connection closed")]
    ConnectionClosed,

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Snapshot blob could not be decoded
    #[error("Snapshot decode error: {0}")]
    SnapshotDecode(String),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether this error ends the connection rather than a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_)
                | GatewayError::Io(_)
                | GatewayError::HandshakeRejected { .. }
                | GatewayError::HandshakeTimeout(_)
                | GatewayError::ClosedBeforeHandshake(_)
                | GatewayError::ConnectionClosed
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for GatewayError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        GatewayError::SnapshotDecode(err.to_string())
    }
}

impl From<base64::DecodeError> for GatewayError {
    fn from(err: base64::DecodeError) -> Self {
        GatewayError::SnapshotDecode(format!("invalid base64: {}", err))
    }
}
