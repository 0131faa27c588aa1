//! Client for the Beacon gateway protocol
//!
//! This crate provides:
//! - Length-prefixed framing and the JSON envelope protocol
//! - The connection handshake state machine
//! - Request/response correlation by request id
//! - Transport abstractions (AsyncReader/AsyncWriter traits) and TCP transport
//! - `GatewayClient`, which drives one connection from a background task

pub mod client;
pub mod config;
pub mod correlator;
pub mod framing;
pub mod handshake;
pub mod protocol;
pub mod tcp;
pub mod transport;

pub use beacon_core::{GatewayError, Result};
pub use client::GatewayClient;
pub use config::GatewayConfig;
pub use handshake::ConnectionState;
pub use protocol::{ActionResponse, HandshakeInfo, ResultCode};
pub use transport::{AsyncReader, AsyncWriter};
