//! Wire format encoding and decoding.
//!
//! Implements the 8-byte header format:
//! ```text
//! ┌───────────┬───────────┐
//! │ Opcode    │ Length    │
//! │ 4 bytes   │ 4 bytes   │
//! │ uint32 LE │ uint32 LE │
//! └───────────┴───────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. The payload that follows is
//! `Length` bytes of UTF-8 JSON (possibly empty).

use std::fmt;

use crate::error::{IpcError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size accepted from the peer (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Protocol version carried in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frame operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// First frame after connecting: `{ v, client_id }`.
    Handshake = 0,
    /// Application message.
    Frame = 1,
    /// Connection teardown, carries `{ code, message }`.
    Close = 2,
    /// Keepalive request; answered with `Pong`.
    Ping = 3,
    /// Keepalive reply.
    Pong = 4,
}

impl Opcode {
    /// Numeric code written on the wire.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Map a wire code to an opcode.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Handshake),
            1 => Some(Self::Frame),
            2 => Some(Self::Close),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            _ => None,
        }
    }
}

impl TryFrom<u32> for Opcode {
    type Error = IpcError;

    fn try_from(code: u32) -> Result<Self> {
        Self::from_code(code)
            .ok_or_else(|| IpcError::MalformedFrame(format!("unknown opcode {}", code)))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handshake => "HANDSHAKE",
            Self::Frame => "FRAME",
            Self::Close => "CLOSE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        };
        f.write_str(name)
    }
}

/// Decoded header from wire format.
///
/// The opcode is kept raw so that an unknown code can still be skipped
/// using its declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw operation code.
    pub opcode: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(opcode: Opcode, payload_length: u32) -> Self {
        Self {
            opcode: opcode.code(),
            payload_length,
        }
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use presence_ipc::protocol::{Header, Opcode};
    ///
    /// let bytes = Header::new(Opcode::Frame, 100).encode();
    /// assert_eq!(bytes, [1, 0, 0, 0, 100, 0, 0, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.opcode.to_le_bytes());
        buf[4..8].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            opcode: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            payload_length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Typed opcode, or a malformed-frame error for unknown codes.
    pub fn opcode(&self) -> Result<Opcode> {
        Opcode::try_from(self.opcode)
    }

    /// Total frame size on the wire (header + payload).
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }

    /// Check the declared length against the maximum accepted payload.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(IpcError::MalformedFrame(format!(
                "payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }
        Ok(())
    }
}
