//! Protocol module - wire format, framing, frame types and commands.
//!
//! This module implements the subscriber side of the TCP protocol:
//! - 8-byte frame header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with classification predicates
//! - Outbound command encoding

mod command;
mod frame;
mod frame_buffer;
mod wire_format;

pub use command::{
    validate_channel_name, validate_topic_name, Command, EPHEMERAL_SUFFIX, MAX_NAME_LEN,
};
pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    FrameType, Header, CLOSE_WAIT, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, HEARTBEAT, MAGIC_V2, OK,
    SIZE_FIELD_LEN,
};
