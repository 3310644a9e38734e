//! Per-connection flow-control credit.
//!
//! The server may only push as many messages as the client granted with
//! `RDY`. The subscriber grants exactly one credit after subscribing and one
//! after each completed message, so a connection never has more than one
//! message in flight.
//!
//! [`ReadyCredit`] mirrors what the server believes: `available` is the
//! credit the server may still spend, `in_flight` the delivered messages not
//! yet finished or requeued. Both are only touched from the dispatch loop.

/// Credit granted after subscribing and after each completed lifecycle.
pub const READY_COUNT: u32 = 1;

/// Client-side view of one connection's flow-control state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadyCredit {
    available: u32,
    in_flight: u32,
}

impl ReadyCredit {
    /// Fresh state: nothing granted, nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `RDY count` grant. RDY replaces the previous count.
    pub fn grant(&mut self, count: u32) {
        self.available = count;
    }

    /// Record a delivery.
    ///
    /// Returns `false` when the server delivered without outstanding credit.
    /// The delivery is still counted so settlement stays balanced.
    pub fn on_delivery(&mut self) -> bool {
        self.in_flight += 1;
        if self.available == 0 {
            return false;
        }
        self.available -= 1;
        true
    }

    /// Record a FIN or REQ for an in-flight message.
    pub fn settle(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Credit the server may still spend.
    #[inline]
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Delivered messages awaiting FIN or REQ.
    #[inline]
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }
}
