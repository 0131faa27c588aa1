//! Transport abstractions for the gateway client
//!
//! The connection driver only sees whole frame bodies. Implementations own
//! the framing and any buffering needed to get there.

use async_trait::async_trait;
use beacon_core::Result;

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read the next complete frame body.
    ///
    /// Returns `Ok(None)` when the peer closed the stream on a frame
    /// boundary. Must be cancel-safe: the driver polls it inside
    /// `tokio::select!`, and a dropped call must not lose buffered bytes.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send {
    /// Write one frame body, length prefix included
    async fn write_frame(&mut self, body: &[u8]) -> Result<()>;

    /// Close the write side; the peer sees end of stream
    async fn shutdown(&mut self) -> Result<()>;
}
