//! Message handler - the user callback invoked for each delivered message.
//!
//! Any `Fn(Message) -> impl Future<Output = HandlerResult>` closure is a
//! handler. Returning `Err` marks the message failed, which hands it to the
//! requeue strategy.
//!
//! # Example
//!
//! ```ignore
//! consumer
//!     .subscribe("orders", "billing", |message: Message| async move {
//!         let order: Order = message.json()?;
//!         process(order).await?;
//!         Ok(())
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use crate::error::BoxError;
use crate::message::Message;

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<(), BoxError>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for message handlers.
pub trait Handler: Send + Sync + 'static {
    /// Process one message.
    fn call(&self, message: Message) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning a closure into a [`Handler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, message: Message) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(message))
    }
}
