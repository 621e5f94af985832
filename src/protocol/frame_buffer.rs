//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 8 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! A single push may yield zero, one or many frames; bytes past the last
//! complete frame stay buffered for the next push.
//!
//! # Example
//!
//! ```
//! use presence_ipc::protocol::{encode_frame, FrameBuffer, Opcode};
//! use serde_json::json;
//!
//! let bytes = encode_frame(Opcode::Frame, Some(&json!({ "evt": "READY" }))).unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! assert!(buffer.push(&bytes[..3]).is_empty());
//! let frames = buffer.push(&bytes[3..]);
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::{IpcError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 8 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 16KB, max payload: 16MB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Each entry is either a decoded frame or the malformed-frame error for
    /// one frame. A frame with a bad opcode or payload is dropped on its own
    /// and decoding continues at the next frame boundary. A header declaring
    /// an oversized payload leaves no boundary to resume from, so the whole
    /// buffer is discarded.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one() {
            frames.push(frame);
        }
        frames
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns `None` if more data is needed.
    fn try_extract_one(&mut self) -> Option<Result<Frame>> {
        match &self.state {
            State::WaitingForHeader => {
                let header = Header::decode(&self.buffer)?;

                if let Err(e) = header.validate(self.max_payload_size) {
                    self.clear();
                    return Some(Err(e));
                }

                let _ = self.buffer.split_to(HEADER_SIZE);
                self.state = State::WaitingForPayload { header };

                self.try_extract_one()
            }

            State::WaitingForPayload { header } => {
                let remaining = header.payload_length as usize;
                if self.buffer.len() < remaining {
                    return None;
                }

                let header = *header;
                let payload = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForHeader;

                Some(Frame::from_parts(header, payload))
            }
        }
    }

    /// Signal end of stream.
    ///
    /// Returns a malformed-frame error if an incomplete frame was still
    /// buffered, then resets the buffer.
    pub fn finish(&mut self) -> Option<IpcError> {
        let pending = self.pending_len();
        self.clear();

        (pending > 0).then(|| {
            IpcError::MalformedFrame(format!(
                "stream ended with {} bytes of an incomplete frame",
                pending
            ))
        })
    }

    /// Number of bytes belonging to a frame that is not yet complete.
    pub fn pending_len(&self) -> usize {
        match &self.state {
            State::WaitingForHeader => self.buffer.len(),
            State::WaitingForPayload { .. } => HEADER_SIZE + self.buffer.len(),
        }
    }

    /// Check if the buffer holds no partial frame.
    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
