//! Envelope protocol for the Beacon gateway
//!
//! Every frame carries one JSON envelope:
//! `{"type": "...", "timestamp": <ms>, "connectionId": "...", "body": {...}}`.
//! `connectionId` is omitted on the initial `handshake` and present on every
//! envelope sent after the handshake completed.

use beacon_core::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Protocol version spoken by this client
pub const PROTOCOL_VERSION: u32 = 1;

/// Capabilities declared in the handshake
pub const CAPABILITIES: &[&str] = &["actions"];

/// Envelope `type` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Handshake,
    HandshakeAck,
    Request,
    Response,
    Ping,
    Pong,
    Error,
}

impl MessageType {
    const ALL: [MessageType; 7] = [
        MessageType::Handshake,
        MessageType::HandshakeAck,
        MessageType::Request,
        MessageType::Response,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Error,
    ];

    /// Name used on the wire
    pub fn wire_name(self) -> &'static str {
        match self {
            MessageType::Handshake => "handshake",
            MessageType::HandshakeAck => "handshake_ack",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Error => "error",
        }
    }

    /// Parse a wire name, ignoring case
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.wire_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Outbound envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub body: Value,
}

impl Envelope {
    /// Envelope stamped with the current time
    pub fn new(kind: MessageType, connection_id: Option<String>, body: Value) -> Self {
        Self {
            kind,
            timestamp: now_millis(),
            connection_id,
            body,
        }
    }

    /// Initial handshake; never carries a connection id
    pub fn handshake(body: &HandshakeBody) -> Result<Self> {
        Ok(Self::new(
            MessageType::Handshake,
            None,
            serde_json::to_value(body)?,
        ))
    }

    /// Action request on an established connection
    pub fn request(connection_id: &str, body: &RequestBody) -> Result<Self> {
        Ok(Self::new(
            MessageType::Request,
            Some(connection_id.to_string()),
            serde_json::to_value(body)?,
        ))
    }

    /// Keepalive ping
    pub fn ping(connection_id: &str) -> Self {
        Self::new(
            MessageType::Ping,
            Some(connection_id.to_string()),
            Value::Object(Map::new()),
        )
    }

    /// Serialize to UTF-8 JSON, ready for framing
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Body of the `handshake` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeBody {
    pub protocol_version: u32,
    pub client_id: String,
    pub token: String,
    pub capabilities: Vec<String>,
}

impl HandshakeBody {
    pub fn new(client_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            client_id: client_id.into(),
            token: token.into(),
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Body of the `request` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    pub protocol_version: u32,
    pub request_id: String,
    pub action: String,
    pub payload: Value,
}

impl RequestBody {
    pub fn new(request_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            request_id: request_id.into(),
            action: action.into(),
            payload,
        }
    }
}

/// Body of `handshake_ack`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInfo {
    pub connection_id: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub mod_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of an inbound `error`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn code(&self) -> &str {
        self.error_code.as_deref().unwrap_or("ERROR")
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("Unknown gateway error")
    }

    /// Error surfaced to a pending `connect()`
    pub fn into_rejection(self) -> GatewayError {
        GatewayError::HandshakeRejected {
            code: self.code().to_string(),
            message: self.message().to_string(),
        }
    }
}

/// Status reported by the server for an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    Busy,
    InvalidAction,
    InvalidPayload,
    NotReady,
    Error,
}

/// Body of a `response`, delivered as-is to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// `Some(Value::Null)` when the server sent an explicit `null`
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
    /// Fields the protocol layer does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

static NULL: Value = Value::Null;

impl ActionResponse {
    /// The payload, or `null` when the body had none
    pub fn payload(&self) -> &Value {
        self.payload.as_ref().unwrap_or(&NULL)
    }

    /// Parsed `result`, if it is one of the known codes
    pub fn result_code(&self) -> Option<ResultCode> {
        let result = self.result.as_deref()?;
        serde_json::from_value(Value::String(result.to_string())).ok()
    }

    /// True unless the server reported a non-OK result
    pub fn is_ok(&self) -> bool {
        self.result.is_none() || self.result_code() == Some(ResultCode::Ok)
    }
}

/// Classified inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    HandshakeAck(HandshakeInfo),
    Response(ActionResponse),
    Error(ErrorBody),
    Pong,
    /// A type this client never expects to receive
    Unexpected(MessageType),
}

/// Wire shape before classification
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: Value,
}

/// Parse and classify an inbound frame body.
///
/// Anything that is not a well-formed envelope is a protocol violation; the
/// caller discards the frame and keeps the connection.
pub fn decode(bytes: &[u8]) -> Result<Inbound> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::ProtocolViolation(format!("invalid frame JSON: {}", e)))?;

    let kind = MessageType::from_wire_name(&raw.kind).ok_or_else(|| {
        GatewayError::ProtocolViolation(format!("unknown message type: {}", raw.kind))
    })?;

    let body = match raw.body {
        Value::Object(_) => raw.body,
        _ => Value::Object(Map::new()),
    };

    match kind {
        MessageType::HandshakeAck => parse_body(kind, body).map(Inbound::HandshakeAck),
        MessageType::Response => parse_body(kind, body).map(Inbound::Response),
        MessageType::Error => parse_body(kind, body).map(Inbound::Error),
        MessageType::Pong => Ok(Inbound::Pong),
        other => Ok(Inbound::Unexpected(other)),
    }
}

/// Keeps an explicit `null` as `Some(Value::Null)`
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn parse_body<T: for<'de> Deserialize<'de>>(kind: MessageType, body: Value) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| GatewayError::ProtocolViolation(format!("invalid {} body: {}", kind, e)))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
