//! Length-prefixed framing
//!
//! Wire format: a 4-byte big-endian unsigned length, then exactly that many
//! bytes of UTF-8 JSON. This layer is format-agnostic and enforces no upper
//! bound on the declared length; the transport decides what it will buffer.

use beacon_core::{GatewayError, Result};

/// Size of the length prefix
pub const HEADER_LEN: usize = 4;

/// Prefix a body with its length
pub fn encode(body: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(body.len()).map_err(|_| {
        GatewayError::ProtocolViolation(format!("frame body too large: {} bytes", body.len()))
    })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Extract every complete frame at the start of `buffer`.
///
/// Returns the frame bodies and the number of bytes they occupied; whatever
/// follows is an incomplete frame.
pub fn split_frames(buffer: &[u8]) -> (Vec<Vec<u8>>, usize) {
    let mut frames = Vec::new();
    let mut offset = 0;
    while let Some(len) = declared_len(&buffer[offset..]) {
        let end = offset + HEADER_LEN + len;
        if buffer.len() < end {
            break;
        }
        frames.push(buffer[offset + HEADER_LEN..end].to_vec());
        offset = end;
    }
    (frames, offset)
}

/// Append `new_bytes` to `buffer` and take out every complete frame.
///
/// Returns the frames and the remainder to pass to the next call.
pub fn feed(mut buffer: Vec<u8>, new_bytes: &[u8]) -> (Vec<Vec<u8>>, Vec<u8>) {
    buffer.extend_from_slice(new_bytes);
    let (frames, consumed) = split_frames(&buffer);
    buffer.drain(..consumed);
    (frames, buffer)
}

/// Declared body length of the frame at the start of `buffer`, if the
/// header has arrived
pub fn declared_len(buffer: &[u8]) -> Option<usize> {
    let header: [u8; HEADER_LEN] = buffer.get(..HEADER_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

/// Receive-side reassembly buffer
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a chunk from the socket and return the frames it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let (frames, remainder) = feed(std::mem::take(&mut self.buffer), chunk);
        self.buffer = remainder;
        frames
    }

    /// Declared length of the frame still being assembled
    pub fn pending_frame_len(&self) -> Option<usize> {
        declared_len(&self.buffer)
    }

    /// Number of bytes held back for an incomplete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
