//! One subscribed connection to a queue host.
//!
//! Owns the writer side of the socket and the flow-control state. The read
//! side is handed to the reactor when the connection is registered.

use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedReadHalf;
use tokio::task::JoinHandle;

use crate::config::{ConsumerConfig, Timeouts};
use crate::error::{NsqError, Result};
use crate::flow::ReadyCredit;
use crate::identity::ClientIdentity;
use crate::message::MessageId;
use crate::pool::ConnectionId;
use crate::protocol::Command;
use crate::transport::{self, HostAddr};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// An open connection.
pub struct Connection {
    id: ConnectionId,
    addr: HostAddr,
    timeouts: Timeouts,
    writer: WriterHandle,
    writer_task: Option<JoinHandle<Result<()>>>,
    credit: ReadyCredit,
}

impl Connection {
    /// Connect to `addr` and return the connection plus its read half.
    pub async fn open(
        id: ConnectionId,
        addr: HostAddr,
        config: &ConsumerConfig,
    ) -> Result<(Self, OwnedReadHalf)> {
        let stream = transport::connect(&addr, config.timeouts.connect).await?;
        let (reader, write_half) = stream.into_split();
        let connection =
            Self::with_writer(id, addr, config.timeouts, write_half, config.writer_config());
        Ok((connection, reader))
    }

    /// Build a connection over any writer, spawning its writer task.
    pub fn with_writer<W>(
        id: ConnectionId,
        addr: HostAddr,
        timeouts: Timeouts,
        writer: W,
        writer_config: WriterConfig,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, writer_task) = spawn_writer_task(writer, writer_config);
        Self {
            id,
            addr,
            timeouts,
            writer,
            writer_task: Some(writer_task),
            credit: ReadyCredit::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> &HostAddr {
        &self.addr
    }

    pub fn credit(&self) -> ReadyCredit {
        self.credit
    }

    /// Queue a raw command.
    pub async fn send(&self, command: &Command) -> Result<()> {
        self.writer.send(command).await
    }

    /// Write the protocol magic.
    pub async fn handshake(&self) -> Result<()> {
        self.send(&Command::Magic).await
    }

    /// Write SUB for `topic`/`channel` with the client identity.
    pub async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        identity: &ClientIdentity,
    ) -> Result<()> {
        self.send(&Command::Subscribe {
            topic: topic.to_string(),
            channel: channel.to_string(),
            short_id: identity.short_id().to_string(),
            long_id: identity.long_id().to_string(),
        })
        .await
    }

    /// Grant `count` credits.
    pub async fn ready(&mut self, count: u32) -> Result<()> {
        self.send(&Command::Ready(count)).await?;
        self.credit.grant(count);
        Ok(())
    }

    /// Acknowledge a message.
    pub async fn finish(&mut self, id: MessageId) -> Result<()> {
        self.send(&Command::Finish(id)).await?;
        self.credit.settle();
        Ok(())
    }

    /// Ask for redelivery after `delay`.
    pub async fn requeue(&mut self, id: MessageId, delay: Duration) -> Result<()> {
        self.send(&Command::Requeue(id, delay)).await?;
        self.credit.settle();
        Ok(())
    }

    /// Reply to a heartbeat.
    pub async fn nop(&self) -> Result<()> {
        self.send(&Command::Nop).await
    }

    /// Record a delivery; `false` if the server had no credit to spend.
    pub fn on_delivery(&mut self) -> bool {
        self.credit.on_delivery()
    }

    /// Write CLS, flush, and close the socket.
    ///
    /// Waits at most the read/write timeout for the writer to drain.
    pub async fn close(mut self) -> Result<()> {
        let sent = self.writer.send(&Command::Close).await;
        let task = self.writer_task.take();
        // Dropping the last handle lets the writer drain and shut down
        drop(self.writer);

        if let Some(task) = task {
            match tokio::time::timeout(self.timeouts.read_write, task).await {
                Ok(Ok(result)) => result?,
                Ok(Err(join)) => {
                    return Err(NsqError::Io(std::io::Error::other(join.to_string())))
                }
                Err(_) => return Err(NsqError::Timeout("write")),
            }
        }
        sent
    }

    /// Whether the writer task has already exited, taking its error with it.
    pub fn writer_exited(&self) -> bool {
        self.writer.is_closed()
    }

    /// Queue CLS without waiting. Used where awaiting is impossible.
    pub fn close_nowait(&self) {
        if self.writer.is_closed() {
            return;
        }
        if let Err(e) = self.writer.try_send(&Command::Close) {
            tracing::debug!(connection = %self.id, "CLS not queued: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn test_connection() -> (Connection, DuplexStream) {
        let (client, server) = duplex(4096);
        let connection = Connection::with_writer(
            ConnectionId::new(7),
            HostAddr::new("10.0.0.1", 4150),
            Timeouts::default(),
            client,
            WriterConfig::default(),
        );
        (connection, server)
    }

    #[tokio::test]
    async fn test_subscribe_sequence() {
        let (mut connection, mut server) = test_connection();
        let identity = ClientIdentity::new("worker1", "worker1.example.com").unwrap();

        connection.handshake().await.unwrap();
        connection.subscribe("orders", "billing", &identity).await.unwrap();
        connection.ready(1).await.unwrap();

        let expected: &[u8] = b"  V2SUB orders billing worker1 worker1.example.com\nRDY 1\n";
        let mut buf = vec![0u8; expected.len()];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
        assert_eq!(connection.credit().available(), 1);
    }

    #[tokio::test]
    async fn test_finish_settles_credit() {
        let (mut connection, _server) = test_connection();
        connection.ready(1).await.unwrap();
        assert!(connection.on_delivery());
        assert_eq!(connection.credit().in_flight(), 1);

        connection.finish(MessageId::new(*b"0123456789abcdef")).await.unwrap();
        assert_eq!(connection.credit().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_close_writes_cls_and_eof() {
        let (connection, mut server) = test_connection();
        assert_eq!(connection.addr().to_string(), "10.0.0.1:4150");

        connection.close().await.unwrap();

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"CLS\n");
    }
}
