//! Outbound commands.
//!
//! Every command the subscriber sends is a single ASCII line:
//!
//! | Command | Wire form |
//! |---|---|
//! | `Magic` | `"  V2"` (no newline) |
//! | `Subscribe` | `SUB <topic> <channel> <short_id> <long_id>\n` |
//! | `Ready` | `RDY <count>\n` |
//! | `Finish` | `FIN <message_id>\n` |
//! | `Requeue` | `REQ <message_id> <delay_ms>\n` |
//! | `Nop` | `NOP\n` |
//! | `Close` | `CLS\n` |

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::MAGIC_V2;
use crate::error::{NsqError, Result};
use crate::message::MessageId;

/// Longest legal topic or channel name, `#ephemeral` suffix included.
pub const MAX_NAME_LEN: usize = 64;

/// Suffix marking an ephemeral topic or channel.
pub const EPHEMERAL_SUFFIX: &str = "#ephemeral";

/// A command sent from the subscriber to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Protocol handshake.
    Magic,
    /// Subscribe to a topic/channel, advertising the client identity.
    Subscribe {
        topic: String,
        channel: String,
        short_id: String,
        long_id: String,
    },
    /// Grant `count` flow-control credits.
    Ready(u32),
    /// Acknowledge a processed message.
    Finish(MessageId),
    /// Ask for redelivery after `delay`.
    Requeue(MessageId, Duration),
    /// Reply to a heartbeat.
    Nop,
    /// Start a clean close.
    Close,
}

impl Command {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Magic => "MAGIC",
            Command::Subscribe { .. } => "SUB",
            Command::Ready(_) => "RDY",
            Command::Finish(_) => "FIN",
            Command::Requeue(_, _) => "REQ",
            Command::Nop => "NOP",
            Command::Close => "CLS",
        }
    }

    /// Encode this command to wire bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use nsq_subscriber::protocol::Command;
    ///
    /// assert_eq!(&Command::Ready(1).encode()[..], b"RDY 1\n");
    /// assert_eq!(&Command::Nop.encode()[..], b"NOP\n");
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode this command into an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Command::Magic => buf.put_slice(MAGIC_V2),
            Command::Subscribe {
                topic,
                channel,
                short_id,
                long_id,
            } => {
                buf.put_slice(b"SUB ");
                put_params(
                    buf,
                    &[
                        topic.as_bytes(),
                        channel.as_bytes(),
                        short_id.as_bytes(),
                        long_id.as_bytes(),
                    ],
                );
            }
            Command::Ready(count) => {
                let count = count.to_string();
                buf.put_slice(b"RDY ");
                put_params(buf, &[count.as_bytes()]);
            }
            Command::Finish(id) => {
                buf.put_slice(b"FIN ");
                put_params(buf, &[id.as_bytes()]);
            }
            Command::Requeue(id, delay) => {
                buf.put_slice(b"REQ ");
                let millis = delay.as_millis().to_string();
                put_params(buf, &[id.as_bytes(), millis.as_bytes()]);
            }
            Command::Nop => buf.put_slice(b"NOP\n"),
            Command::Close => buf.put_slice(b"CLS\n"),
        }
    }
}

fn put_params(buf: &mut BytesMut, params: &[&[u8]]) {
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b' ');
        }
        buf.put_slice(param);
    }
    buf.put_u8(b'\n');
}

/// Check a topic name: 1..=64 bytes of `[A-Za-z0-9._-]`, optional `#ephemeral`.
pub fn validate_topic_name(name: &str) -> Result<()> {
    validate_name("topic", name)
}

/// Check a channel name with the same rules as topics.
pub fn validate_channel_name(name: &str) -> Result<()> {
    validate_name("channel", name)
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(NsqError::InvalidArgument(format!(
            "{} name {:?} must be 1 to {} bytes",
            kind, name, MAX_NAME_LEN
        )));
    }

    let stem = name.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(name);
    if stem.is_empty() || !stem.bytes().all(is_name_byte) {
        return Err(NsqError::InvalidArgument(format!(
            "{} name {:?} contains invalid characters",
            kind, name
        )));
    }

    Ok(())
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-'
}
