//! Frame struct and the single-frame codec.
//!
//! A frame is an 8-byte header followed by a UTF-8 JSON payload. The payload
//! is parsed on decode; the raw bytes are kept alongside (zero-copy via
//! `bytes::Bytes`) so a PING payload can be echoed back byte for byte.
//!
//! # Example
//!
//! ```
//! use presence_ipc::protocol::{decode_frame, encode_frame, Opcode};
//! use serde_json::json;
//!
//! let bytes = encode_frame(Opcode::Frame, Some(&json!({ "cmd": "PING" }))).unwrap();
//! let frame = decode_frame(&bytes).unwrap().unwrap();
//!
//! assert_eq!(frame.opcode, Opcode::Frame);
//! assert_eq!(frame.payload, Some(json!({ "cmd": "PING" })));
//! ```

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::wire_format::{Header, Opcode, HEADER_SIZE};
use crate::error::{IpcError, Result};

/// A complete, validated protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Operation code.
    pub opcode: Opcode,
    /// Parsed payload, `None` for a zero-length payload.
    pub payload: Option<Value>,
    /// Payload bytes exactly as received.
    raw: Bytes,
}

impl Frame {
    /// Validate a header and its payload bytes into a frame.
    ///
    /// The payload must be exactly `header.payload_length` bytes of UTF-8 JSON.
    pub fn from_parts(header: Header, raw: Bytes) -> Result<Self> {
        if raw.len() != header.payload_length as usize {
            return Err(IpcError::MalformedFrame(format!(
                "declared payload length {} but {} bytes present",
                header.payload_length,
                raw.len()
            )));
        }

        let opcode = header.opcode()?;

        let payload = if raw.is_empty() {
            None
        } else {
            let text = std::str::from_utf8(&raw)
                .map_err(|e| IpcError::MalformedFrame(format!("payload is not UTF-8: {}", e)))?;
            let value = serde_json::from_str(text)
                .map_err(|e| IpcError::MalformedFrame(format!("payload is not JSON: {}", e)))?;
            Some(value)
        };

        Ok(Self {
            opcode,
            payload,
            raw,
        })
    }

    /// Get the raw payload bytes.
    #[inline]
    pub fn raw_payload(&self) -> &[u8] {
        &self.raw
    }

    /// Get the payload length in bytes.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.raw.len()
    }
}

/// Build a complete frame from an opcode and already-encoded payload bytes.
///
/// # Example
///
/// ```
/// use presence_ipc::protocol::{build_frame, Opcode, HEADER_SIZE};
///
/// let bytes = build_frame(Opcode::Pong, b"{}").unwrap();
/// assert_eq!(bytes.len(), HEADER_SIZE + 2);
/// ```
pub fn build_frame(opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        IpcError::MalformedFrame(format!("payload of {} bytes is too large", payload.len()))
    })?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&Header::new(opcode, length).encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encode a frame: header followed by the JSON encoding of `payload`.
///
/// An absent payload encodes as a zero-length payload (8 bytes total).
pub fn encode_frame<T>(opcode: Opcode, payload: Option<&T>) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    match payload {
        Some(value) => build_frame(opcode, &serde_json::to_vec(value)?),
        None => build_frame(opcode, &[]),
    }
}

/// Decode exactly one frame from `buf`.
///
/// Returns `Ok(None)` for an empty buffer (no data yet). Fails with
/// [`IpcError::MalformedFrame`] when fewer than 8 bytes are present, when the
/// buffer length is not `8 + declared_length`, or when the payload is not
/// UTF-8 JSON.
pub fn decode_frame(buf: &[u8]) -> Result<Option<Frame>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let header = Header::decode(buf).ok_or_else(|| {
        IpcError::MalformedFrame(format!(
            "need at least {} bytes for a header, got {}",
            HEADER_SIZE,
            buf.len()
        ))
    })?;

    if buf.len() != header.frame_len() {
        return Err(IpcError::MalformedFrame(format!(
            "declared payload length {} but {} bytes present",
            header.payload_length,
            buf.len() - HEADER_SIZE
        )));
    }

    Frame::from_parts(header, Bytes::copy_from_slice(&buf[HEADER_SIZE..])).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_activity_roundtrip() {
        let payload = json!({
            "cmd": "SET_ACTIVITY",
            "args": { "pid": 1234, "activity": { "state": "x" } },
            "nonce": "abc"
        });

        let bytes = encode_frame(Opcode::Frame, Some(&payload)).unwrap();
        let frame = decode_frame(&bytes).unwrap().unwrap();

        assert_eq!(frame.opcode.code(), 1);
        assert_eq!(frame.payload, Some(payload));
    }

    #[test]
    fn test_roundtrip_every_opcode() {
        let payload = json!({ "v": 1, "client_id": "42" });
        for opcode in [
            Opcode::Handshake,
            Opcode::Frame,
            Opcode::Close,
            Opcode::Ping,
            Opcode::Pong,
        ] {
            let bytes = encode_frame(opcode, Some(&payload)).unwrap();
            let frame = decode_frame(&bytes).unwrap().unwrap();
            assert_eq!(frame.opcode, opcode);
            assert_eq!(frame.payload.as_ref(), Some(&payload));
        }
    }

    #[test]
    fn test_empty_payload_is_8_bytes() {
        let bytes = encode_frame::<Value>(Opcode::Ping, None).unwrap();
        assert_eq!(bytes, [3, 0, 0, 0, 0, 0, 0, 0]);

        let frame = decode_frame(&bytes).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Ping);
        assert!(frame.payload.is_none());
        assert_eq!(frame.payload_len(), 0);
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode_frame(Opcode::Close, Some("bye")).unwrap();

        // "bye" as JSON is 5 bytes including quotes
        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &5u32.to_le_bytes());
        assert_eq!(&bytes[8..], b"\"bye\"");
    }

    #[test]
    fn test_decode_empty_is_no_data() {
        assert!(decode_frame(&[]).unwrap().is_none());
    }

    #[test]
    fn test_decode_short_buffer_rejected() {
        let result = decode_frame(&[1, 0, 0, 0, 0]);
        assert!(matches!(result, Err(IpcError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_length_mismatch_rejected() {
        let mut bytes = encode_frame(Opcode::Frame, Some(&json!({ "a": 1 }))).unwrap();

        // One byte too many
        bytes.push(b' ');
        let result = decode_frame(&bytes);
        assert!(result.unwrap_err().to_string().contains("declared payload length"));

        // Two bytes too few
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            decode_frame(&bytes),
            Err(IpcError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_invalid_json_rejected() {
        let bytes = build_frame(Opcode::Frame, b"{not json").unwrap();
        let err = decode_frame(&bytes).unwrap_err();
        assert!(err.to_string().contains("not JSON"));
    }

    #[test]
    fn test_decode_invalid_utf8_rejected() {
        let bytes = build_frame(Opcode::Frame, &[0xFF, 0xFE]).unwrap();
        let err = decode_frame(&bytes).unwrap_err();
        assert!(err.to_string().contains("not UTF-8"));
    }

    #[test]
    fn test_decode_unknown_opcode_rejected() {
        let mut bytes = build_frame(Opcode::Frame, b"{}").unwrap();
        bytes[0] = 7;
        assert!(matches!(
            decode_frame(&bytes),
            Err(IpcError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_raw_payload_preserved() {
        let raw = br#"{"b":1,"a":2}"#;
        let bytes = build_frame(Opcode::Ping, raw).unwrap();
        let frame = decode_frame(&bytes).unwrap().unwrap();

        assert_eq!(frame.raw_payload(), raw);
    }
}
