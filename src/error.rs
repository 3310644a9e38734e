//! Error types for nsq-subscriber.

use bytes::Bytes;
use thiserror::Error;

use crate::pool::ConnectionId;
use crate::protocol::FrameType;

/// Boxed error returned by user callbacks and pluggable collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all subscriber operations.
#[derive(Debug, Error)]
pub enum NsqError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration overrides, message body decoding).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed data on the wire (bad size, unknown frame type, short message).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server sent a frame the subscriber cannot act on.
    ///
    /// Carries the raw payload so the caller can inspect the server's message.
    #[error("Protocol error: unexpected {frame_type} frame: {}", String::from_utf8_lossy(.payload))]
    UnexpectedFrame {
        /// Type tag of the offending frame.
        frame_type: FrameType,
        /// Raw frame payload.
        payload: Bytes,
    },

    /// Invalid configuration or call argument (topic/channel names, identity, config values).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No pooled connection for the given handle.
    #[error("Connection {0} not found")]
    NotFound(ConnectionId),

    /// A connection with this handle is already pooled.
    #[error("Connection {0} already registered")]
    DuplicateConnection(ConnectionId),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A transport deadline elapsed. Names the phase (connect, write, read).
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Host discovery failed.
    ///
    /// The built-in lookups never fail; custom [`Lookup`](crate::Lookup)
    /// implementations return this so `subscribe` can pass it through.
    #[error("Lookup error: {0}")]
    Lookup(String),
}

impl NsqError {
    /// Whether this error came from the transport rather than the protocol.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            NsqError::Io(_) | NsqError::ConnectionClosed | NsqError::Timeout(_)
        )
    }
}

/// Result type alias using NsqError.
pub type Result<T> = std::result::Result<T, NsqError>;
