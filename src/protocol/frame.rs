//! Frame struct with classification predicates.
//!
//! Represents one decoded server frame. Uses `bytes::Bytes` so the message
//! body handed to callbacks shares the read buffer's allocation.
//!
//! # Example
//!
//! ```
//! use nsq_subscriber::protocol::{Frame, FrameType};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(FrameType::Response, Bytes::from_static(b"_heartbeat_"));
//! assert!(frame.is_heartbeat());
//! assert!(!frame.is_message());
//! ```

use bytes::Bytes;

use super::wire_format::{FrameType, Header, CLOSE_WAIT, HEADER_SIZE, HEARTBEAT, OK};

/// A complete server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type tag.
    pub frame_type: FrameType,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Response frame carrying the keepalive literal.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.frame_type == FrameType::Response && self.payload.as_ref() == HEARTBEAT
    }

    /// Message frame.
    #[inline]
    pub fn is_message(&self) -> bool {
        self.frame_type == FrameType::Message
    }

    /// Error frame.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.frame_type == FrameType::Error
    }

    /// Response frame acknowledging a command (`OK` or `CLOSE_WAIT`).
    #[inline]
    pub fn is_acknowledgement(&self) -> bool {
        self.frame_type == FrameType::Response
            && (self.payload.as_ref() == OK || self.payload.as_ref() == CLOSE_WAIT)
    }
}

/// Build the wire bytes of a server frame.
///
/// The subscriber never sends frames; this is what a server (or a test
/// double standing in for one) writes.
///
/// ```
/// use nsq_subscriber::protocol::{build_frame, FrameType};
///
/// let bytes = build_frame(FrameType::Response, b"OK");
/// assert_eq!(bytes, [0, 0, 0, 6, 0, 0, 0, 0, b'O', b'K']);
/// ```
pub fn build_frame(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(frame_type, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
