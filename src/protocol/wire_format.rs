//! Wire format constants and the frame header.
//!
//! Every server frame is laid out as:
//! ```text
//! ┌──────────┬──────────┬─────────────────────┐
//! │ Size     │ Type     │ Payload             │
//! │ 4 bytes  │ 4 bytes  │ size - 4 bytes      │
//! │ uint32 BE│ uint32 BE│                     │
//! └──────────┴──────────┴─────────────────────┘
//! ```
//!
//! `Size` counts the type field plus the payload, never itself.

use std::fmt;

use crate::error::{NsqError, Result};

/// Magic identifier sent immediately after connecting.
pub const MAGIC_V2: &[u8; 4] = b"  V2";

/// Header size in bytes (size field + type field).
pub const HEADER_SIZE: usize = 8;

/// Width of the size prefix.
pub const SIZE_FIELD_LEN: usize = 4;

/// Default maximum frame size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Response payload the server uses as a keepalive.
pub const HEARTBEAT: &[u8] = b"_heartbeat_";

/// Response payload acknowledging SUB.
pub const OK: &[u8] = b"OK";

/// Response payload acknowledging CLS.
pub const CLOSE_WAIT: &[u8] = b"CLOSE_WAIT";

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Server response (heartbeat, OK, CLOSE_WAIT).
    Response,
    /// Server error string.
    Error,
    /// Queued message.
    Message,
}

impl FrameType {
    /// Wire value of this frame type.
    pub fn as_u32(self) -> u32 {
        match self {
            FrameType::Response => 0,
            FrameType::Error => 1,
            FrameType::Message => 2,
        }
    }
}

impl TryFrom<u32> for FrameType {
    type Error = NsqError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(FrameType::Response),
            1 => Ok(FrameType::Error),
            2 => Ok(FrameType::Message),
            other => Err(NsqError::Protocol(format!("Unknown frame type {}", other))),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Response => "response",
            FrameType::Error => "error",
            FrameType::Message => "message",
        };
        f.write_str(name)
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame type.
    pub frame_type: FrameType,
    /// Payload length in bytes (size field minus the type field).
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(frame_type: FrameType, payload_length: u32) -> Self {
        Self {
            frame_type,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use nsq_subscriber::protocol::{FrameType, Header};
    ///
    /// let bytes = Header::new(FrameType::Response, 2).encode();
    /// assert_eq!(bytes, [0, 0, 0, 6, 0, 0, 0, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let size = self.payload_length.saturating_add(SIZE_FIELD_LEN as u32);
        buf[0..4].copy_from_slice(&size.to_be_bytes());
        buf[4..8].copy_from_slice(&self.frame_type.as_u32().to_be_bytes());
        buf
    }

    /// Decode and validate a header.
    ///
    /// Returns `Ok(None)` if fewer than `HEADER_SIZE` bytes are available.
    /// Fails if the size field cannot hold the type field, exceeds
    /// `max_frame_size`, or the type is unknown.
    pub fn decode(buf: &[u8], max_frame_size: u32) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (size as usize) < SIZE_FIELD_LEN {
            return Err(NsqError::Protocol(format!(
                "Frame size {} too small to hold frame type",
                size
            )));
        }
        if size > max_frame_size {
            return Err(NsqError::Protocol(format!(
                "Frame size {} exceeds maximum {}",
                size, max_frame_size
            )));
        }

        let raw_type = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let frame_type = FrameType::try_from(raw_type)?;

        Ok(Some(Self {
            frame_type,
            payload_length: size - SIZE_FIELD_LEN as u32,
        }))
    }
}
