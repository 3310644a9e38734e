//! # nsq-subscriber
//!
//! Subscriber-side client core for the NSQ TCP protocol (`V2`).
//!
//! A [`Consumer`] subscribes a callback to a topic/channel on every host a
//! [`Lookup`] returns, then runs a single dispatch loop over all of those
//! connections.
//!
//! ## Architecture
//!
//! - **Reader tasks**: one per connection, incremental framing into
//!   [`protocol::FrameBuffer`]
//! - **Dispatch loop**: one frame at a time; heartbeat → `NOP`, message →
//!   dedupe → callback → `FIN`/`REQ` → `RDY 1`
//! - **Writer tasks**: one per connection, batched command writes
//!
//! Flow control is one credit per connection: each message is settled and the
//! credit re-granted before the next one arrives.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use nsq_subscriber::{Consumer, FixedDelay, MemoryDedupe, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut consumer = Consumer::builder()
//!         .hosts(["10.0.0.1:4150", "10.0.0.2:4150"])
//!         .dedupe(MemoryDedupe::default())
//!         .requeue_strategy(FixedDelay::new(Duration::from_secs(5), 5))
//!         .build()?;
//!
//!     consumer
//!         .subscribe("orders", "billing", |message: Message| async move {
//!             let order: serde_json::Value = message.json()?;
//!             println!("{order}");
//!             Ok(())
//!         })
//!         .await?;
//!
//!     consumer.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dedupe;
pub mod error;
pub mod handler;
pub mod lookup;
pub mod message;
pub mod protocol;
pub mod requeue;
pub mod transport;

mod connection;
mod consumer;
mod dispatch;
mod flow;
mod identity;
mod pool;
mod reactor;
mod writer;

pub use config::{ConsumerConfig, HostFailurePolicy, Timeouts};
pub use consumer::{Consumer, ConsumerBuilder};
pub use dedupe::{Dedupe, MemoryDedupe, NoDedupe};
pub use dispatch::{Disposition, FinishReason};
pub use error::{BoxError, NsqError, Result};
pub use flow::READY_COUNT;
pub use handler::{Handler, HandlerResult};
pub use identity::ClientIdentity;
pub use lookup::{Lookup, StaticLookup};
pub use message::{Message, MessageId};
pub use pool::ConnectionId;
pub use reactor::StopHandle;
pub use requeue::{ExponentialBackoff, FixedDelay, NoRequeue, RequeueStrategy};
