//! Consumer configuration.
//!
//! Defaults are compiled in; `from_env` and `from_json_str` layer overrides
//! on top. Durations are given in milliseconds in both override sources.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{NsqError, Result};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::writer::{WriterConfig, DEFAULT_CHANNEL_CAPACITY};

/// Default TCP connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default deadline for a write batch, and for finishing a frame once its
/// first byte has arrived.
pub const DEFAULT_READ_WRITE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default idle deadline between frames. Servers heartbeat every 30s.
pub const DEFAULT_READ_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default capacity of the reactor's readiness queue.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Per-connection timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect.
    pub connect: Duration,
    /// Single write batch; completing a partially received frame.
    pub read_write: Duration,
    /// Silence between frames before the connection is considered dead.
    pub read_wait: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read_write: DEFAULT_READ_WRITE_TIMEOUT,
            read_wait: DEFAULT_READ_WAIT_TIMEOUT,
        }
    }
}

/// What `subscribe` does when one host of several cannot be connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFailurePolicy {
    /// Return the error and close the connections this `subscribe` call
    /// opened. Subscriptions made by earlier calls are untouched.
    #[default]
    Abort,
    /// Log the error and continue with the remaining hosts.
    Skip,
}

impl std::str::FromStr for HostFailurePolicy {
    type Err = NsqError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(HostFailurePolicy::Abort),
            "skip" => Ok(HostFailurePolicy::Skip),
            other => Err(NsqError::InvalidArgument(format!(
                "unknown host failure policy {:?}",
                other
            ))),
        }
    }
}

/// Full consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub timeouts: Timeouts,
    /// Largest accepted value of a frame's size field.
    pub max_frame_size: u32,
    /// Readiness events buffered between reader tasks and the dispatch loop.
    pub event_capacity: usize,
    /// Outbound command queue depth per connection.
    pub writer_channel_capacity: usize,
    pub host_failure_policy: HostFailurePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            writer_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            host_failure_policy: HostFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
struct ConsumerConfigOverride {
    connect_timeout_ms: Option<u64>,
    read_write_timeout_ms: Option<u64>,
    read_wait_timeout_ms: Option<u64>,
    max_frame_size: Option<u32>,
    event_capacity: Option<usize>,
    writer_channel_capacity: Option<usize>,
    host_failure_policy: Option<HostFailurePolicy>,
}

impl ConsumerConfigOverride {
    fn apply(self, config: &mut ConsumerConfig) {
        if let Some(ms) = self.connect_timeout_ms {
            config.timeouts.connect = Duration::from_millis(ms);
        }
        if let Some(ms) = self.read_write_timeout_ms {
            config.timeouts.read_write = Duration::from_millis(ms);
        }
        if let Some(ms) = self.read_wait_timeout_ms {
            config.timeouts.read_wait = Duration::from_millis(ms);
        }
        if let Some(size) = self.max_frame_size {
            config.max_frame_size = size;
        }
        if let Some(capacity) = self.event_capacity {
            config.event_capacity = capacity;
        }
        if let Some(capacity) = self.writer_channel_capacity {
            config.writer_channel_capacity = capacity;
        }
        if let Some(policy) = self.host_failure_policy {
            config.host_failure_policy = policy;
        }
    }
}

impl ConsumerConfig {
    /// Defaults overridden by `NSQ_*` environment variables.
    ///
    /// Recognised: `NSQ_CONNECT_TIMEOUT_MS`, `NSQ_READ_WRITE_TIMEOUT_MS`,
    /// `NSQ_READ_WAIT_TIMEOUT_MS`, `NSQ_MAX_FRAME_SIZE`, `NSQ_EVENT_CAPACITY`,
    /// `NSQ_WRITER_CHANNEL_CAPACITY`, `NSQ_HOST_FAILURE_POLICY`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by a JSON document with the same keys, lowercased
    /// and without the `NSQ_` prefix.
    ///
    /// ```
    /// use nsq_subscriber::{ConsumerConfig, HostFailurePolicy};
    ///
    /// let config = ConsumerConfig::from_json_str(
    ///     r#"{"read_wait_timeout_ms": 45000, "host_failure_policy": "skip"}"#,
    /// ).unwrap();
    /// assert_eq!(config.timeouts.read_wait.as_secs(), 45);
    /// assert_eq!(config.host_failure_policy, HostFailurePolicy::Skip);
    /// ```
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let overrides: ConsumerConfigOverride = serde_json::from_str(contents)?;
        let mut config = Self::default();
        overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let overrides = ConsumerConfigOverride {
            connect_timeout_ms: parse_var(&lookup, "NSQ_CONNECT_TIMEOUT_MS")?,
            read_write_timeout_ms: parse_var(&lookup, "NSQ_READ_WRITE_TIMEOUT_MS")?,
            read_wait_timeout_ms: parse_var(&lookup, "NSQ_READ_WAIT_TIMEOUT_MS")?,
            max_frame_size: parse_var(&lookup, "NSQ_MAX_FRAME_SIZE")?,
            event_capacity: parse_var(&lookup, "NSQ_EVENT_CAPACITY")?,
            writer_channel_capacity: parse_var(&lookup, "NSQ_WRITER_CHANNEL_CAPACITY")?,
            host_failure_policy: parse_var(&lookup, "NSQ_HOST_FAILURE_POLICY")?,
        };
        let mut config = Self::default();
        overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot work.
    pub fn validate(&self) -> Result<()> {
        let Timeouts {
            connect,
            read_write,
            read_wait,
        } = self.timeouts;
        if connect.is_zero() || read_write.is_zero() || read_wait.is_zero() {
            return Err(NsqError::InvalidArgument(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if (self.max_frame_size as usize) < crate::protocol::SIZE_FIELD_LEN {
            return Err(NsqError::InvalidArgument(format!(
                "max_frame_size {} cannot hold a frame type",
                self.max_frame_size
            )));
        }
        if self.event_capacity == 0 || self.writer_channel_capacity == 0 {
            return Err(NsqError::InvalidArgument(
                "queue capacities must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Writer settings derived from this config.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            channel_capacity: self.writer_channel_capacity,
            write_timeout: self.timeouts.read_write,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| NsqError::InvalidArgument(format!("{}={:?} is not valid", key, raw))),
    }
}
