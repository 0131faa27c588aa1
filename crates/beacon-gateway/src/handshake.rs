//! Connection handshake state machine
//!
//! `Connecting -> HandshakeSent -> Established`, with `Failed` reachable from
//! any state before `Established` and `Closed` reachable from every state.
//! The machine only tracks state; the connection driver performs the I/O and
//! settles the caller of `connect()` from the returned outcomes.

use crate::protocol::{ErrorBody, HandshakeInfo};
use beacon_core::{GatewayError, Result};

/// Lifecycle of one gateway connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    HandshakeSent,
    Established,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Still waiting for the handshake to settle
    pub fn is_pending(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::HandshakeSent)
    }
}

/// Result of feeding a `handshake_ack`
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// Connection is now established
    Established(HandshakeInfo),
    /// Ack arrived in a state where it means nothing
    Ignored,
}

/// Result of feeding an `error` envelope
#[derive(Debug)]
pub enum ErrorOutcome {
    /// Handshake failed; surface this to the caller of `connect()`
    Rejected(GatewayError),
    /// Connection is established; report and carry on
    Warning,
    /// Connection already failed or closed
    Ignored,
}

/// Handshake state for one connection
#[derive(Debug)]
pub struct Handshake {
    state: ConnectionState,
    info: Option<HandshakeInfo>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
            info: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Established
    }

    /// Ack details, once established
    pub fn info(&self) -> Option<&HandshakeInfo> {
        self.info.as_ref()
    }

    /// Id to attach to outbound envelopes; `None` until established
    pub fn connection_id(&self) -> Option<&str> {
        if self.is_established() {
            self.info.as_ref().map(|info| info.connection_id.as_str())
        } else {
            None
        }
    }

    /// The `handshake` envelope went out
    pub fn mark_sent(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::HandshakeSent;
                Ok(())
            }
            other => Err(GatewayError::ProtocolViolation(format!(
                "handshake cannot be sent in state {:?}",
                other
            ))),
        }
    }

    pub fn on_ack(&mut self, info: HandshakeInfo) -> AckOutcome {
        if self.state != ConnectionState::HandshakeSent {
            return AckOutcome::Ignored;
        }
        self.state = ConnectionState::Established;
        self.info = Some(info.clone());
        AckOutcome::Established(info)
    }

    /// Only the first pre-handshake error fails the connection
    pub fn on_error(&mut self, body: ErrorBody) -> ErrorOutcome {
        match self.state {
            ConnectionState::Connecting | ConnectionState::HandshakeSent => {
                self.state = ConnectionState::Failed;
                ErrorOutcome::Rejected(body.into_rejection())
            }
            ConnectionState::Established => ErrorOutcome::Warning,
            ConnectionState::Failed | ConnectionState::Closed => ErrorOutcome::Ignored,
        }
    }

    /// Socket closed or errored.
    ///
    /// Returns the error for the caller of `connect()` when the handshake
    /// was still in flight.
    pub fn on_transport_lost(&mut self, reason: &str) -> Option<GatewayError> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::HandshakeSent => {
                self.state = ConnectionState::Failed;
                Some(GatewayError::ClosedBeforeHandshake(reason.to_string()))
            }
            ConnectionState::Established => {
                self.state = ConnectionState::Closed;
                None
            }
            ConnectionState::Failed | ConnectionState::Closed => None,
        }
    }

    /// Give up on a handshake still in flight. Returns false if it had
    /// already settled.
    pub fn fail(&mut self) -> bool {
        if self.state.is_pending() {
            self.state = ConnectionState::Failed;
            true
        } else {
            false
        }
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}
