//! Duplicate suppression.
//!
//! The dispatch loop asks the dedupe store once per delivery, before the
//! callback runs. A "seen" answer skips the callback but the message is
//! still finished.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

use crate::error::BoxError;
use crate::message::{Message, MessageId};

/// Pluggable dedupe store.
pub trait Dedupe: Send + Sync {
    /// Report whether `message` was already seen on `topic`/`channel`, and
    /// record it either way.
    fn contains_and_add(
        &self,
        topic: &str,
        channel: &str,
        message: &Message,
    ) -> Result<bool, BoxError>;

    /// Forget `message` so a redelivery is processed again.
    ///
    /// Called when the callback fails.
    fn erase(&self, _topic: &str, _channel: &str, _message: &Message) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Dedupe store that never reports duplicates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDedupe;

impl Dedupe for NoDedupe {
    fn contains_and_add(&self, _: &str, _: &str, _: &Message) -> Result<bool, BoxError> {
        Ok(false)
    }
}

/// Default slot count for [`MemoryDedupe`].
pub const DEFAULT_DEDUPE_SLOTS: usize = 1 << 16;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Entry {
    scope: u64,
    id: MessageId,
}

/// Fixed-size in-memory dedupe table.
///
/// Each (topic, channel, id) hashes to one slot holding the last key that
/// landed there. A colliding key evicts the older one, so memory stays
/// bounded and some duplicates may slip through, but a message is only
/// reported as seen when its exact key is stored.
pub struct MemoryDedupe {
    slots: Mutex<Vec<Option<Entry>>>,
}

impl MemoryDedupe {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; slots.max(1)]),
        }
    }

    fn locate(&self, topic: &str, channel: &str, id: MessageId, len: usize) -> (usize, Entry) {
        let mut scope_hasher = DefaultHasher::new();
        topic.hash(&mut scope_hasher);
        channel.hash(&mut scope_hasher);
        let scope = scope_hasher.finish();

        let mut hasher = DefaultHasher::new();
        scope.hash(&mut hasher);
        id.hash(&mut hasher);
        let index = (hasher.finish() % len as u64) as usize;

        (index, Entry { scope, id })
    }
}

impl Default for MemoryDedupe {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUPE_SLOTS)
    }
}

impl Dedupe for MemoryDedupe {
    fn contains_and_add(
        &self,
        topic: &str,
        channel: &str,
        message: &Message,
    ) -> Result<bool, BoxError> {
        let mut slots = self.slots.lock();
        let (index, entry) = self.locate(topic, channel, message.id(), slots.len());
        let seen = slots[index] == Some(entry);
        slots[index] = Some(entry);
        Ok(seen)
    }

    fn erase(&self, topic: &str, channel: &str, message: &Message) -> Result<(), BoxError> {
        let mut slots = self.slots.lock();
        let (index, entry) = self.locate(topic, channel, message.id(), slots.len());
        if slots[index] == Some(entry) {
            slots[index] = None;
        }
        Ok(())
    }
}
