//! # beacon-core
//!
//! Core types for the Beacon gateway protocol.
//!
//! This crate provides the pieces shared by the gateway client and its consumers:
//! - Error taxonomy for transport, protocol and per-request failures
//! - Request id generation and validation
//! - Tagged snapshot values decoded from MessagePack
//! - The normalizer that renders snapshot values as lossless JSON

pub mod error;
pub mod normalize;
pub mod request_id;
pub mod snapshot;
pub mod value;

pub use error::{GatewayError, Result};
pub use normalize::{Normalizer, normalize};
pub use snapshot::{SnapshotBlob, SnapshotEntry, snapshot_entries};
pub use value::SnapshotValue;
