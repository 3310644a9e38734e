//! Message entity built from a message frame.
//!
//! Message frame payload layout:
//! ```text
//! ┌───────────┬──────────┬──────────────┬──────────┐
//! │ Timestamp │ Attempts │ Message ID   │ Body     │
//! │ 8 bytes   │ 2 bytes  │ 16 bytes     │ rest     │
//! │ int64 BE  │ uint16 BE│ ASCII        │          │
//! └───────────┴──────────┴──────────────┴──────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{NsqError, Result};
use crate::protocol::Frame;

/// Width of a message id on the wire.
pub const MESSAGE_ID_LEN: usize = 16;

/// Bytes preceding the body in a message frame.
pub const MESSAGE_HEADER_LEN: usize = 8 + 2 + MESSAGE_ID_LEN;

/// Opaque server-assigned message identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_LEN]);

impl MessageId {
    /// Wrap raw id bytes.
    pub fn new(bytes: [u8; MESSAGE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw id bytes, as written back in FIN/REQ.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self)
    }
}

/// A delivered message.
///
/// Cheap to clone: the body shares the frame's buffer and topic/channel are
/// reference counted. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct Message {
    id: MessageId,
    timestamp: i64,
    attempts: u16,
    body: Bytes,
    topic: Arc<str>,
    channel: Arc<str>,
}

impl Message {
    /// Build a message from a message frame received on `topic`/`channel`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is not a message frame or its
    /// payload is shorter than the fixed message header.
    pub fn from_frame(frame: &Frame, topic: Arc<str>, channel: Arc<str>) -> Result<Self> {
        if !frame.is_message() {
            return Err(NsqError::Protocol(format!(
                "Expected message frame, got {} frame",
                frame.frame_type
            )));
        }

        let payload = &frame.payload;
        if payload.len() < MESSAGE_HEADER_LEN {
            return Err(NsqError::Protocol(format!(
                "Message payload {} bytes, need at least {}",
                payload.len(),
                MESSAGE_HEADER_LEN
            )));
        }

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&payload[0..8]);
        let mut id = [0u8; MESSAGE_ID_LEN];
        id.copy_from_slice(&payload[10..MESSAGE_HEADER_LEN]);

        Ok(Self {
            id: MessageId(id),
            timestamp: i64::from_be_bytes(ts),
            attempts: u16::from_be_bytes([payload[8], payload[9]]),
            body: payload.slice(MESSAGE_HEADER_LEN..),
            topic,
            channel,
        })
    }

    /// Server-assigned id.
    #[inline]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Publish timestamp in nanoseconds since the Unix epoch.
    #[inline]
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp
    }

    /// Publish timestamp. Negative wire values clamp to the epoch.
    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.timestamp.max(0) as u64)
    }

    /// Delivery attempts so far, this one included.
    #[inline]
    pub fn attempts(&self) -> u16 {
        self.attempts
    }

    /// Opaque body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as `Bytes` (cheap, zero-copy).
    #[inline]
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Topic the message arrived on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Channel the message arrived on.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Build a message frame payload. Test doubles for the server use this.
pub fn encode_message_payload(
    id: &MessageId,
    timestamp: i64,
    attempts: u16,
    body: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MESSAGE_HEADER_LEN + body.len());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&attempts.to_be_bytes());
    buf.extend_from_slice(id.as_bytes());
    buf.extend_from_slice(body);
    buf
}
