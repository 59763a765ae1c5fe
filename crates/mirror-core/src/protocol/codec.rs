//! Binary frame codec for RPC traffic.
//!
//! Wire format:
//! ```text
//! [version:1][kind:1][flags:1][reserved:1][payload_len:4][call_id:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//! Payloads are bincode-encoded [`RpcRequest`], [`RpcResponse`],
//! [`RpcStatus`] or [`ConnectionMetadata`] values depending on the kind.
//!
//! Every call gets its own `call_id`; all frames belonging to the call
//! (request, response or stream items, final status, cancellation) carry it.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::protocol::messages::{
    ConnectionMetadata, RpcRequest, RpcResponse, HEADER_SIZE, PROTOCOL_VERSION,
};
use crate::protocol::status::RpcStatus;

/// Flag bit set when the payload is compressed.
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The frame kind byte in the header is not a recognized value.
    #[error("unknown frame kind: 0x{0:02X}")]
    UnknownFrameKind(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be serialized or deserialized.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The frame is larger than the receiver accepts.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// The frame is compressed but compression was disabled for the channel.
    #[error("received a compressed frame on a channel with compression disabled")]
    CompressionDisabled,
}

/// Kind of a frame, stored in the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Metadata = 0x01,
    Request = 0x02,
    Response = 0x03,
    StreamItem = 0x04,
    StreamEnd = 0x05,
    Status = 0x06,
    Cancel = 0x07,
}

impl TryFrom<u8> for FrameKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(FrameKind::Metadata),
            0x02 => Ok(FrameKind::Request),
            0x03 => Ok(FrameKind::Response),
            0x04 => Ok(FrameKind::StreamItem),
            0x05 => Ok(FrameKind::StreamEnd),
            0x06 => Ok(FrameKind::Status),
            0x07 => Ok(FrameKind::Cancel),
            _ => Err(()),
        }
    }
}

/// Limits applied while decoding inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Largest accepted frame, header included.
    pub max_message_size: usize,
    pub compression_enabled: bool,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_message_size: 4 * 1024 * 1024,
            compression_enabled: false,
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub flags: u8,
    pub payload_len: usize,
    pub call_id: u64,
    pub timestamp_us: u64,
}

impl FrameHeader {
    /// Parses and validates the first [`HEADER_SIZE`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for short input, a foreign version or kind, a
    /// frame over `limits.max_message_size`, or a compressed frame when
    /// compression is disabled.
    pub fn parse(bytes: &[u8], limits: &DecodeLimits) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let version = bytes[0];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let kind = FrameKind::try_from(bytes[1]).map_err(|_| ProtocolError::UnknownFrameKind(bytes[1]))?;
        let flags = bytes[2];
        // bytes[3] is reserved – ignored on decode

        let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let size = HEADER_SIZE + payload_len;
        if size > limits.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                limit: limits.max_message_size,
            });
        }
        if flags & FLAG_COMPRESSED != 0 && !limits.compression_enabled {
            return Err(ProtocolError::CompressionDisabled);
        }

        Ok(Self {
            kind,
            flags,
            payload_len,
            call_id: read_u64(&bytes[8..16]),
            timestamp_us: read_u64(&bytes[16..24]),
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub flags: u8,
    pub call_id: u64,
    pub timestamp_us: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    fn with_payload<T: Serialize>(kind: FrameKind, call_id: u64, value: &T) -> Result<Self, ProtocolError> {
        let payload = bincode::serialize(value).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
        Ok(Self {
            kind,
            flags: 0,
            call_id,
            timestamp_us: current_timestamp_us(),
            payload,
        })
    }

    fn empty(kind: FrameKind, call_id: u64) -> Self {
        Self {
            kind,
            flags: 0,
            call_id,
            timestamp_us: current_timestamp_us(),
            payload: Vec::new(),
        }
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
    pub fn metadata(metadata: &ConnectionMetadata) -> Result<Self, ProtocolError> {
        Self::with_payload(FrameKind::Metadata, 0, metadata)
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
    pub fn request(call_id: u64, request: &RpcRequest) -> Result<Self, ProtocolError> {
        Self::with_payload(FrameKind::Request, call_id, request)
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
    pub fn response(call_id: u64, response: &RpcResponse) -> Result<Self, ProtocolError> {
        Self::with_payload(FrameKind::Response, call_id, response)
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
    pub fn stream_item(call_id: u64, item: &RpcResponse) -> Result<Self, ProtocolError> {
        Self::with_payload(FrameKind::StreamItem, call_id, item)
    }

    pub fn stream_end(call_id: u64) -> Self {
        Self::empty(FrameKind::StreamEnd, call_id)
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
    pub fn status(call_id: u64, status: &RpcStatus) -> Result<Self, ProtocolError> {
        Self::with_payload(FrameKind::Status, call_id, status)
    }

    /// Cancellation of `call_id`; the status message carries the reason.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
    pub fn cancel(call_id: u64, reason: &str) -> Result<Self, ProtocolError> {
        Self::with_payload(FrameKind::Cancel, call_id, &RpcStatus::cancelled(reason))
    }

    /// Deserializes the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the bytes do not decode as `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        bincode::deserialize(&self.payload).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }

    /// Total encoded size including the header.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Appends the encoded `frame` to `buf`.
pub fn encode_frame_into(frame: &Frame, buf: &mut Vec<u8>) {
    buf.reserve(frame.encoded_len());

    // Header: version (1) + kind (1) + flags (1) + reserved (1) + payload_len (4) +
    //         call_id (8) + timestamp_us (8) = 24 bytes
    buf.push(PROTOCOL_VERSION);
    buf.push(frame.kind as u8);
    buf.push(frame.flags);
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(frame.payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&frame.call_id.to_be_bytes());
    buf.extend_from_slice(&frame.timestamp_us.to_be_bytes());
    buf.extend_from_slice(&frame.payload);
}

/// Encodes `frame` into a new byte vector.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frame.encoded_len());
    encode_frame_into(frame, &mut buf);
    buf
}

/// Decodes one [`Frame`] from the beginning of `bytes`.
///
/// Returns the frame and the number of bytes consumed so the caller can
/// advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the header is invalid or the payload is
/// incomplete.
pub fn decode_frame(bytes: &[u8], limits: &DecodeLimits) -> Result<(Frame, usize), ProtocolError> {
    let header = FrameHeader::parse(bytes, limits)?;

    let total_needed = HEADER_SIZE + header.payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: header.payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let frame = Frame {
        kind: header.kind,
        flags: header.flags,
        call_id: header.call_id,
        timestamp_us: header.timestamp_us,
        payload: bytes[HEADER_SIZE..total_needed].to_vec(),
    };
    Ok((frame, total_needed))
}

/// Microseconds since the Unix epoch, or 0 if the clock is before it.
pub fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{ImageFormat, ImageMessage, KeyboardEvent};
    use crate::protocol::status::StatusCode;

    fn limits() -> DecodeLimits {
        DecodeLimits::default()
    }

    #[test]
    fn test_encode_frame_writes_big_endian_header() {
        // Arrange
        let frame = Frame {
            kind: FrameKind::StreamEnd,
            flags: 0,
            call_id: 0x0102,
            timestamp_us: 7,
            payload: vec![],
        };

        // Act
        let bytes = encode_frame(&frame);

        // Assert
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], FrameKind::StreamEnd as u8);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[14..16], &[0x01, 0x02]);
        assert_eq!(bytes[23], 7);
    }

    #[test]
    fn test_request_frame_decodes_to_same_request() {
        // Arrange
        let request = RpcRequest::SendKey(KeyboardEvent::text("hello"));
        let frame = Frame::request(42, &request).unwrap();

        // Act
        let bytes = encode_frame(&frame);
        let (decoded, consumed) = decode_frame(&bytes, &limits()).unwrap();

        // Assert
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.call_id, 42);
        assert_eq!(decoded.kind, FrameKind::Request);
        assert_eq!(decoded.decode_payload::<RpcRequest>().unwrap(), request);
    }

    #[test]
    fn test_decode_frame_leaves_trailing_bytes_for_next_frame() {
        // Arrange
        let mut bytes = encode_frame(&Frame::stream_end(1));
        bytes.extend(encode_frame(&Frame::stream_end(2)));

        // Act
        let (first, used) = decode_frame(&bytes, &limits()).unwrap();
        let (second, _) = decode_frame(&bytes[used..], &limits()).unwrap();

        // Assert
        assert_eq!(first.call_id, 1);
        assert_eq!(second.call_id, 2);
    }

    #[test]
    fn test_decode_frame_rejects_short_header() {
        let result = decode_frame(&[PROTOCOL_VERSION, 0x02], &limits());
        assert_eq!(result, Err(ProtocolError::InsufficientData { needed: HEADER_SIZE, available: 2 }));
    }

    #[test]
    fn test_decode_frame_rejects_wrong_version() {
        let mut bytes = encode_frame(&Frame::stream_end(1));
        bytes[0] = 0x7F;
        assert_eq!(decode_frame(&bytes, &limits()), Err(ProtocolError::UnsupportedVersion(0x7F)));
    }

    #[test]
    fn test_decode_frame_rejects_unknown_kind() {
        let mut bytes = encode_frame(&Frame::stream_end(1));
        bytes[1] = 0xEE;
        assert_eq!(decode_frame(&bytes, &limits()), Err(ProtocolError::UnknownFrameKind(0xEE)));
    }

    #[test]
    fn test_decode_frame_reports_truncated_payload() {
        // Arrange
        let frame = Frame::response(3, &RpcResponse::Empty).unwrap();
        let bytes = encode_frame(&frame);
        let truncated = &bytes[..bytes.len() - 1];

        // Act
        let result = decode_frame(truncated, &limits());

        // Assert
        assert!(matches!(result, Err(ProtocolError::PayloadLengthMismatch { .. })));
    }

    #[test]
    fn test_decode_frame_enforces_message_size_limit() {
        // Arrange: a 10x10 RGB frame needs 300 payload bytes plus envelope.
        let image = ImageMessage {
            format: ImageFormat { width: 10, height: 10, ..Default::default() },
            image: vec![0; 300],
            seq: 0,
            timestamp_us: 0,
        };
        let frame = Frame::stream_item(5, &RpcResponse::Image(image)).unwrap();
        let bytes = encode_frame(&frame);
        let tight = DecodeLimits { max_message_size: 200, compression_enabled: false };

        // Act
        let result = decode_frame(&bytes, &tight);

        // Assert
        assert_eq!(result, Err(ProtocolError::MessageTooLarge { size: bytes.len(), limit: 200 }));
    }

    #[test]
    fn test_decode_frame_rejects_compressed_frame_when_disabled() {
        let mut frame = Frame::stream_end(1);
        frame.flags = FLAG_COMPRESSED;
        let bytes = encode_frame(&frame);
        assert_eq!(decode_frame(&bytes, &limits()), Err(ProtocolError::CompressionDisabled));
    }

    #[test]
    fn test_cancel_frame_carries_reason_as_cancelled_status() {
        let frame = Frame::cancel(9, "Canceled by consumer").unwrap();
        let status: RpcStatus = frame.decode_payload().unwrap();
        assert_eq!(status.code, StatusCode::Cancelled);
        assert_eq!(status.message, "Canceled by consumer");
    }

    #[test]
    fn test_decode_payload_reports_malformed_bytes() {
        let frame = Frame { payload: vec![0xFF; 3], ..Frame::stream_end(1) };
        assert!(matches!(frame.decode_payload::<RpcRequest>(), Err(ProtocolError::MalformedPayload(_))));
    }
}
