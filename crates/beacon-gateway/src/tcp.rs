//! TCP transport implementation
//!
//! The Beacon gateway listens on plain TCP. Reads go through `FrameDecoder`
//! so partial frames survive a cancelled `read_frame()`.

use crate::framing::{self, FrameDecoder};
use crate::transport::{AsyncReader, AsyncWriter};
use async_trait::async_trait;
use beacon_core::{GatewayError, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

const READ_CHUNK: usize = 8 * 1024;

/// TCP read wrapper
pub struct TcpReadWrapper<R = OwnedReadHalf> {
    inner: R,
    decoder: FrameDecoder,
    ready: VecDeque<Vec<u8>>,
    max_frame_len: usize,
    chunk: Box<[u8]>,
}

impl<R> TcpReadWrapper<R> {
    pub fn new(inner: R, max_frame_len: usize) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            max_frame_len,
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    fn check_pending_len(&self) -> Result<()> {
        match self.decoder.pending_frame_len() {
            Some(len) if len > self.max_frame_len => Err(GatewayError::Transport(format!(
                "Frame too large: {} bytes (limit {})",
                len, self.max_frame_len
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AsyncReader for TcpReadWrapper<R> {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }

            // `read` is cancel-safe; everything after it runs without yielding
            let n = self
                .inner
                .read(&mut self.chunk)
                .await
                .map_err(|e| GatewayError::Transport(format!("TCP read failed: {}", e)))?;

            if n == 0 {
                if self.decoder.buffered() > 0 {
                    return Err(GatewayError::Transport(format!(
                        "Connection closed mid-frame with {} bytes buffered",
                        self.decoder.buffered()
                    )));
                }
                return Ok(None);
            }

            let frames = self.decoder.feed(&self.chunk[..n]);
            for frame in frames {
                if frame.len() > self.max_frame_len {
                    return Err(GatewayError::Transport(format!(
                        "Frame too large: {} bytes (limit {})",
                        frame.len(),
                        self.max_frame_len
                    )));
                }
                self.ready.push_back(frame);
            }
            self.check_pending_len()?;
        }
    }
}

/// TCP write wrapper
pub struct TcpWriteWrapper<W = OwnedWriteHalf>(pub W);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> AsyncWriter for TcpWriteWrapper<W> {
    async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        let frame = framing::encode(body)?;
        self.0
            .write_all(&frame)
            .await
            .map_err(|e| GatewayError::Transport(format!("TCP write failed: {}", e)))?;

        self.0
            .flush()
            .await
            .map_err(|e| GatewayError::Transport(format!("TCP flush failed: {}", e)))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.0
            .shutdown()
            .await
            .map_err(|e| GatewayError::Transport(format!("TCP shutdown failed: {}", e)))
    }
}
