//! Dispatch loop.
//!
//! Each registered connection gets a reader task that feeds socket bytes into
//! a [`FrameBuffer`] and forwards complete frames over one bounded channel.
//! [`Reactor::run`] drains that channel and dispatches one frame at a time, so
//! the pool and the collaborators are only ever touched from one task. A slow
//! peer stalls its own reader, never the loop.
//!
//! ```text
//! reader #1 ──┐
//! reader #2 ──┼──► mpsc<ReactorEvent> ──► run() ──► Dispatcher::dispatch
//! reader #N ──┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::config::Timeouts;
use crate::dispatch::{Dispatcher, Subscription};
use crate::error::{NsqError, Result};
use crate::pool::{ConnectionId, ConnectionPool};
use crate::protocol::{Frame, FrameBuffer};

/// Socket read buffer size per connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Called when a connection is dropped for a transport or protocol failure.
pub type ErrorHook = Box<dyn Fn(ConnectionId, &NsqError) + Send + Sync>;

/// What a reader task reports to the loop.
#[derive(Debug)]
pub enum ReactorEvent {
    /// A complete frame read from the connection.
    Frame(ConnectionId, Frame),
    /// The server closed the socket on a frame boundary.
    Closed(ConnectionId),
    /// Reading failed: I/O error, timeout or malformed frame.
    Failed(ConnectionId, NsqError),
}

struct Registration {
    subscription: Arc<Subscription>,
    reader: JoinHandle<()>,
}

/// Makes a running [`Reactor::run`] return after the current dispatch.
#[derive(Clone)]
pub struct StopHandle {
    notify: Arc<Notify>,
}

impl StopHandle {
    /// Request the loop to stop. A request made while the loop is not
    /// running stops the next run immediately.
    pub fn stop(&self) {
        self.notify.notify_one();
    }
}

/// The readiness loop and its registered connections.
pub struct Reactor {
    tx: mpsc::Sender<ReactorEvent>,
    rx: mpsc::Receiver<ReactorEvent>,
    registrations: HashMap<ConnectionId, Registration>,
    stop: Arc<Notify>,
    timeouts: Timeouts,
    max_frame_size: u32,
    on_error: Option<ErrorHook>,
}

impl Reactor {
    pub fn new(event_capacity: usize, timeouts: Timeouts, max_frame_size: u32) -> Self {
        let (tx, rx) = mpsc::channel(event_capacity.max(1));
        Self {
            tx,
            rx,
            registrations: HashMap::new(),
            stop: Arc::new(Notify::new()),
            timeouts,
            max_frame_size,
            on_error: None,
        }
    }

    pub fn set_error_hook(&mut self, hook: ErrorHook) {
        self.on_error = Some(hook);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            notify: self.stop.clone(),
        }
    }

    /// Start reading `reader` and dispatch its frames to `subscription`.
    pub fn register<R>(
        &mut self,
        id: ConnectionId,
        reader: R,
        subscription: Arc<Subscription>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        if self.registrations.contains_key(&id) {
            return Err(NsqError::DuplicateConnection(id));
        }

        let tx = self.tx.clone();
        let timeouts = self.timeouts;
        let max_frame_size = self.max_frame_size;
        let reader = tokio::spawn(async move {
            let event = match read_frames(id, reader, &tx, timeouts, max_frame_size).await {
                Ok(()) => ReactorEvent::Closed(id),
                Err(e) => ReactorEvent::Failed(id, e),
            };
            let _ = tx.send(event).await;
        });

        self.registrations.insert(
            id,
            Registration {
                subscription,
                reader,
            },
        );
        Ok(())
    }

    /// Stop reading a connection. Returns `false` if it was not registered.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        match self.registrations.remove(&id) {
            Some(registration) => {
                registration.reader.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.registrations.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Dispatch frames until a stop is requested or no connection is left.
    ///
    /// A failing connection is reported to the error hook, unregistered,
    /// removed from `pool` and closed; the others keep running.
    ///
    /// # Errors
    ///
    /// `NotFound` when a registered connection is missing from `pool`.
    pub async fn run(&mut self, pool: &mut ConnectionPool, dispatcher: &Dispatcher) -> Result<()> {
        while !self.is_empty() {
            let event = tokio::select! {
                biased;
                _ = self.stop.notified() => {
                    tracing::debug!("reactor stop requested");
                    return Ok(());
                }
                event = self.rx.recv() => event,
            };
            // The loop holds a sender, so the channel never closes
            let Some(event) = event else {
                return Ok(());
            };

            match event {
                ReactorEvent::Frame(id, frame) => {
                    let Some(subscription) = self
                        .registrations
                        .get(&id)
                        .map(|registration| registration.subscription.clone())
                    else {
                        tracing::debug!(
                            connection = %id,
                            "dropping frame for unregistered connection"
                        );
                        continue;
                    };
                    let connection = pool.find_mut(id)?;
                    let outcome = dispatcher.dispatch(connection, &subscription, frame).await;
                    match outcome {
                        Ok(disposition) => {
                            tracing::trace!(
                                connection = %id,
                                ?disposition,
                                credit = connection.credit().available(),
                                "dispatched"
                            );
                        }
                        Err(e) => self.fail(id, e, pool).await,
                    }
                }
                ReactorEvent::Closed(id) => {
                    if self.is_registered(id) {
                        self.fail(id, NsqError::ConnectionClosed, pool).await;
                    }
                }
                ReactorEvent::Failed(id, e) => {
                    if self.is_registered(id) {
                        self.fail(id, e, pool).await;
                    }
                }
            }
        }
        tracing::debug!("no connections left, reactor exiting");
        Ok(())
    }

    async fn fail(&mut self, id: ConnectionId, mut error: NsqError, pool: &mut ConnectionPool) {
        self.unregister(id);
        let connection = pool.remove(id);
        let addr = connection.as_ref().map(|c| c.addr().to_string());

        if let Some(connection) = connection {
            // A refused send only says the writer is gone; its task says why
            let writer_exited = connection.writer_exited();
            match connection.close().await {
                Err(cause) if writer_exited && matches!(error, NsqError::ConnectionClosed) => {
                    error = cause;
                }
                Err(e) => tracing::debug!(connection = %id, "close after failure: {}", e),
                Ok(()) => {}
            }
        }

        tracing::error!(connection = %id, addr, "connection failed: {}", error);
        if let Some(hook) = &self.on_error {
            hook(id, &error);
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        for (_, registration) in self.registrations.drain() {
            registration.reader.abort();
        }
    }
}

/// Reader task body. `Ok(())` means a clean EOF on a frame boundary or a
/// loop that no longer listens.
async fn read_frames<R>(
    id: ConnectionId,
    mut reader: R,
    tx: &mpsc::Sender<ReactorEvent>,
    timeouts: Timeouts,
    max_frame_size: u32,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::with_max_frame_size(max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        // Idle between frames may last read_wait; a started frame must finish within read_write
        let deadline = if frames.is_mid_frame() {
            timeouts.read_write
        } else {
            timeouts.read_wait
        };

        let n = match tokio::time::timeout(deadline, reader.read(&mut buf)).await {
            Err(_) => return Err(NsqError::Timeout("read")),
            Ok(Ok(0)) if frames.is_mid_frame() => return Err(NsqError::ConnectionClosed),
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(NsqError::Io(e)),
        };

        for frame in frames.push(&buf[..n])? {
            if tx.send(ReactorEvent::Frame(id, frame)).await.is_err() {
                return Ok(());
            }
        }
    }
}
