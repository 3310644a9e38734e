//! Dedicated writer task per connection.
//!
//! Commands are encoded on the dispatch loop and queued on an mpsc channel;
//! one task per connection owns the socket's write half and drains the queue.
//! Queue order is wire order, so FIN/REQ always precede the RDY that follows
//! them.
//!
//! # Architecture
//!
//! ```text
//! Dispatch loop ─► mpsc::Sender<Bytes> ─► Writer Task ─► TCP write half
//! ```
//!
//! Commands queued back-to-back (FIN + RDY) are batched into a single
//! vectored write.

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{NsqError, Result};
use crate::protocol::Command;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default deadline for a single batch write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum commands to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 16;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the command queue.
    pub channel_capacity: usize,
    /// Deadline for writing one batch to the socket.
    pub write_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Handle for queueing commands on a connection's writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue a command, waiting if the channel is full.
    pub async fn send(&self, command: &Command) -> Result<()> {
        self.tx
            .send(command.encode())
            .await
            .map_err(|_| NsqError::ConnectionClosed)
    }

    /// Queue a command without waiting.
    ///
    /// Used on paths that cannot await, such as `Drop`.
    pub fn try_send(&self, command: &Command) -> Result<()> {
        self.tx.try_send(command.encode()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NsqError::Protocol(format!(
                "Writer queue full, dropped {}",
                command.name()
            )),
            mpsc::error::TrySendError::Closed(_) => NsqError::ConnectionClosed,
        })
    }

    /// Whether the writer task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for queueing commands.
///
/// The task exits cleanly once every handle is dropped and the queue is
/// drained, shutting down the write half on the way out.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer, config.write_timeout));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives encoded commands and writes them out.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    timeout: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(bytes) => bytes,
            None => {
                // Channel closed, clean shutdown
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(bytes) => batch.push(bytes),
                Err(_) => break,
            }
        }

        match tokio::time::timeout(timeout, write_batch(&mut writer, &batch)).await {
            Ok(result) => result?,
            Err(_) => return Err(NsqError::Timeout("write")),
        }
    }
}

/// Write a batch of commands using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(NsqError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after a partial write.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for bytes in batch {
        let end = offset + bytes.len();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&bytes[start..]));
        }
        offset = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.write_timeout, DEFAULT_WRITE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_commands_written_in_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(&Command::Nop).await.unwrap();
        handle.send(&Command::Ready(1)).await.unwrap();
        handle.send(&Command::Close).await.unwrap();

        let mut buf = vec![0u8; 14];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"NOP\nRDY 1\nCLS\n");
    }

    #[tokio::test]
    async fn test_try_send_after_writer_exit() {
        let (client, server) = duplex(64);
        drop(server);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        // The first write fails against the dropped peer and ends the task
        handle.send(&Command::Nop).await.unwrap();
        assert!(task.await.unwrap().is_err());

        assert!(handle.is_closed());
        assert!(matches!(
            handle.try_send(&Command::Close),
            Err(NsqError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(&Command::Close).await.unwrap();
        drop(handle);

        assert!(task.await.unwrap().is_ok());

        // Queued command drained before shutdown, then EOF
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(&buf, b"CLS\n");
    }

    #[test]
    fn test_build_remaining_slices_partial() {
        let batch = vec![Bytes::from_static(b"FIN 1\n"), Bytes::from_static(b"RDY 1\n")];

        assert_eq!(build_remaining_slices(&batch, 0).len(), 2);

        let slices = build_remaining_slices(&batch, 4);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"1\n");

        let slices = build_remaining_slices(&batch, 6);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"RDY 1\n");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let id = crate::message::MessageId::new(*b"0123456789abcdef");
        let batch = vec![Command::Finish(id).encode(), Command::Ready(1).encode()];

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner(), b"FIN 0123456789abcdef\nRDY 1\n".to_vec());
    }
}
