//! Consumer builder and subscription lifecycle.
//!
//! The [`ConsumerBuilder`] collects the collaborators and configuration. The
//! [`Consumer`] drives the lifecycle:
//! 1. `subscribe` resolves hosts and opens one connection per host
//! 2. each connection writes the magic, SUB and `RDY 1`
//! 3. `run` dispatches frames until stopped or every connection is gone
//! 4. `shutdown` writes CLS to every connection and closes it
//!
//! # Example
//!
//! ```ignore
//! use nsq_subscriber::{Consumer, Message, StaticLookup};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut consumer = Consumer::builder()
//!         .lookup(StaticLookup::new(["127.0.0.1:4150"]))
//!         .build()?;
//!
//!     consumer
//!         .subscribe("orders", "billing", |message: Message| async move {
//!             println!("{}", String::from_utf8_lossy(message.body()));
//!             Ok(())
//!         })
//!         .await?;
//!
//!     consumer.run().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::config::{ConsumerConfig, HostFailurePolicy};
use crate::connection::Connection;
use crate::dedupe::{Dedupe, NoDedupe};
use crate::dispatch::{Dispatcher, Subscription};
use crate::error::{NsqError, Result};
use crate::flow::READY_COUNT;
use crate::handler::{FnHandler, Handler, HandlerResult};
use crate::identity::ClientIdentity;
use crate::lookup::{Lookup, StaticLookup};
use crate::message::Message;
use crate::pool::{ConnectionId, ConnectionPool};
use crate::protocol::{validate_channel_name, validate_topic_name};
use crate::reactor::{ErrorHook, Reactor, StopHandle};
use crate::requeue::{NoRequeue, RequeueStrategy};
use crate::transport::HostAddr;

/// Builder for configuring and creating a [`Consumer`].
pub struct ConsumerBuilder {
    config: ConsumerConfig,
    identity: Option<ClientIdentity>,
    lookup: Option<Arc<dyn Lookup>>,
    dedupe: Arc<dyn Dedupe>,
    requeue: Arc<dyn RequeueStrategy>,
    on_error: Option<ErrorHook>,
}

impl ConsumerBuilder {
    pub fn new() -> Self {
        Self {
            config: ConsumerConfig::default(),
            identity: None,
            lookup: None,
            dedupe: Arc::new(NoDedupe),
            requeue: Arc::new(NoRequeue),
            on_error: None,
        }
    }

    /// Host discovery. Required.
    pub fn lookup<L: Lookup + 'static>(mut self, lookup: L) -> Self {
        self.lookup = Some(Arc::new(lookup));
        self
    }

    /// Shorthand for a [`StaticLookup`] over `hosts`.
    pub fn hosts<I, S>(self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lookup(StaticLookup::new(hosts))
    }

    /// Duplicate suppression. Default: [`NoDedupe`].
    pub fn dedupe<D: Dedupe + 'static>(mut self, dedupe: D) -> Self {
        self.dedupe = Arc::new(dedupe);
        self
    }

    /// What to do with failed messages. Default: [`NoRequeue`].
    pub fn requeue_strategy<R: RequeueStrategy + 'static>(mut self, strategy: R) -> Self {
        self.requeue = Arc::new(strategy);
        self
    }

    /// Ids sent with SUB. Default: derived from the hostname at build time.
    pub fn identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Called with the handle and cause whenever a connection is dropped
    /// after a transport or protocol failure.
    pub fn on_connection_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionId, &NsqError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Validate the configuration and create the consumer. Opens nothing.
    pub fn build(self) -> Result<Consumer> {
        self.config.validate()?;
        let lookup = self
            .lookup
            .ok_or_else(|| NsqError::InvalidArgument("no lookup configured".to_string()))?;
        let identity = match self.identity {
            Some(identity) => identity,
            None => ClientIdentity::from_hostname()?,
        };

        let mut reactor = Reactor::new(
            self.config.event_capacity,
            self.config.timeouts,
            self.config.max_frame_size,
        );
        if let Some(hook) = self.on_error {
            reactor.set_error_hook(hook);
        }

        tracing::debug!(
            short_id = identity.short_id(),
            long_id = identity.long_id(),
            "consumer built"
        );

        Ok(Consumer {
            config: self.config,
            identity,
            lookup,
            pool: ConnectionPool::new(),
            reactor,
            dispatcher: Dispatcher::new(self.dedupe, self.requeue),
            next_id: 1,
        })
    }
}

impl Default for ConsumerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber over any number of topic/channel subscriptions.
///
/// Dropping a consumer without [`Consumer::shutdown`] queues CLS on every
/// open connection without waiting for it to be written.
pub struct Consumer {
    config: ConsumerConfig,
    identity: ClientIdentity,
    lookup: Arc<dyn Lookup>,
    pool: ConnectionPool,
    reactor: Reactor,
    dispatcher: Dispatcher,
    next_id: u64,
}

impl Consumer {
    pub fn builder() -> ConsumerBuilder {
        ConsumerBuilder::new()
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.pool.len()
    }

    /// Handle that makes [`Consumer::run`] return.
    pub fn stop_handle(&self) -> StopHandle {
        self.reactor.stop_handle()
    }

    /// Subscribe a closure to `topic`/`channel` on every host carrying it.
    pub async fn subscribe<F, Fut>(&mut self, topic: &str, channel: &str, handler: F) -> Result<()>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe_with(topic, channel, FnHandler::new(handler))
            .await
    }

    /// Subscribe a [`Handler`] to `topic`/`channel` on every host carrying it.
    ///
    /// Names are validated before any lookup or connection. An empty host
    /// list subscribes nothing and succeeds. A host that cannot be reached
    /// or subscribed is handled per [`HostFailurePolicy`]: `Abort` closes the
    /// connections this call opened and returns the error, `Skip` logs it and
    /// moves on.
    pub async fn subscribe_with<H: Handler>(
        &mut self,
        topic: &str,
        channel: &str,
        handler: H,
    ) -> Result<()> {
        validate_topic_name(topic)?;
        validate_channel_name(channel)?;

        let hosts = self.lookup.lookup_hosts(topic).await?;
        if hosts.is_empty() {
            tracing::warn!(topic, "lookup returned no hosts");
            return Ok(());
        }

        let subscription = Arc::new(Subscription::new(topic, channel, Arc::new(handler)));
        let mut opened = Vec::with_capacity(hosts.len());

        for host in &hosts {
            match self.connect_host(host, &subscription).await {
                Ok(id) => opened.push(id),
                Err(e) => match self.config.host_failure_policy {
                    HostFailurePolicy::Abort => {
                        tracing::error!(host = %host, topic, channel, "subscribe failed: {}", e);
                        for id in opened {
                            self.discard(id).await;
                        }
                        return Err(e);
                    }
                    HostFailurePolicy::Skip => {
                        tracing::warn!(host = %host, topic, channel, "skipping host: {}", e);
                    }
                },
            }
        }

        tracing::info!(
            topic,
            channel,
            connections = opened.len(),
            hosts = hosts.len(),
            "subscribed"
        );
        Ok(())
    }

    /// Open, register and subscribe one connection.
    async fn connect_host(
        &mut self,
        host: &str,
        subscription: &Arc<Subscription>,
    ) -> Result<ConnectionId> {
        let addr: HostAddr = host.parse()?;
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;

        let (connection, reader) = Connection::open(id, addr, &self.config).await?;
        if let Err(e) = connection.handshake().await {
            let _ = connection.close().await;
            return Err(e);
        }
        self.pool.add(connection)?;
        self.reactor.register(id, reader, subscription.clone())?;

        if let Err(e) = self.start_flow(id, subscription).await {
            self.discard(id).await;
            return Err(e);
        }
        tracing::debug!(connection = %id, host, "connection subscribed");
        Ok(id)
    }

    async fn start_flow(&mut self, id: ConnectionId, subscription: &Subscription) -> Result<()> {
        let connection = self.pool.find_mut(id)?;
        connection
            .subscribe(subscription.topic(), subscription.channel(), &self.identity)
            .await?;
        connection.ready(READY_COUNT).await
    }

    async fn discard(&mut self, id: ConnectionId) {
        self.reactor.unregister(id);
        if let Some(connection) = self.pool.remove(id) {
            if let Err(e) = connection.close().await {
                tracing::debug!(connection = %id, "close failed: {}", e);
            }
        }
    }

    /// Dispatch until stopped or until every connection has gone away, then
    /// shut down.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(connections = self.pool.len(), "consumer running");
        let result = self.reactor.run(&mut self.pool, &self.dispatcher).await;
        let closed = self.shutdown().await;
        result?;
        closed
    }

    /// Write CLS to every connection and close it.
    ///
    /// Every connection is closed even if some fail; the first failure is
    /// returned. Calling this again is a no-op.
    pub async fn shutdown(&mut self) -> Result<()> {
        let mut first_error = None;
        for connection in self.pool.drain() {
            let id = connection.id();
            self.reactor.unregister(id);
            if let Err(e) = connection.close().await {
                tracing::warn!(connection = %id, "close failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        for connection in self.pool.iter() {
            connection.close_nowait();
        }
    }
}
