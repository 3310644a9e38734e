//! Requeue strategies - what to do with a message whose callback failed.

use std::time::Duration;

use crate::error::BoxError;
use crate::message::Message;

/// Backoff policy consulted after a callback failure.
pub trait RequeueStrategy: Send + Sync {
    /// Delay before redelivery, or `None` to abandon (finish) the message.
    fn should_requeue(&self, message: &Message) -> Result<Option<Duration>, BoxError>;
}

/// Never requeue: failed messages are finished.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRequeue;

impl RequeueStrategy for NoRequeue {
    fn should_requeue(&self, _message: &Message) -> Result<Option<Duration>, BoxError> {
        Ok(None)
    }
}

/// Same delay every time, up to `max_attempts` deliveries.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: u16,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_attempts: u16) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), 10)
    }
}

impl RequeueStrategy for FixedDelay {
    fn should_requeue(&self, message: &Message) -> Result<Option<Duration>, BoxError> {
        if message.attempts() >= self.max_attempts {
            return Ok(None);
        }
        Ok(Some(self.delay))
    }
}

/// Delay doubling per attempt: `base * 2^(attempts - 1)`, capped at
/// `max_delay`, up to `max_attempts` deliveries.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u16,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(15 * 60),
            max_attempts: 10,
        }
    }
}

impl RequeueStrategy for ExponentialBackoff {
    fn should_requeue(&self, message: &Message) -> Result<Option<Duration>, BoxError> {
        let attempts = message.attempts();
        if attempts >= self.max_attempts {
            return Ok(None);
        }
        let exponent = u32::from(attempts.saturating_sub(1)).min(31);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        Ok(Some(delay))
    }
}
