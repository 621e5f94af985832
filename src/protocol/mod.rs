//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary protocol spoken on the socket:
//! - 8-byte little-endian header encoding/decoding
//! - Single-frame codec with JSON payloads
//! - Frame buffer for accumulating partial reads

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, decode_frame, encode_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{Header, Opcode, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, PROTOCOL_VERSION};
