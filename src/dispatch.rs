//! Message lifecycle for one readiness event.
//!
//! ```text
//! heartbeat ──► NOP
//! OK / CLOSE_WAIT ──► (nothing)
//! message ──► dedupe ─seen─────────────────────────► FIN, RDY 1
//!               └─new─► callback ─ok───────────────► FIN, RDY 1
//!                          └─err─► strategy ─delay─► REQ, RDY 1
//!                                     └─none──────► FIN, RDY 1
//! anything else ──► UnexpectedFrame error, nothing written
//! ```
//!
//! Exactly one of FIN or REQ is written per delivery, followed by exactly one
//! RDY 1. A panicking callback counts as a failed one.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::connection::Connection;
use crate::dedupe::Dedupe;
use crate::error::{NsqError, Result};
use crate::flow::READY_COUNT;
use crate::handler::{Handler, HandlerResult};
use crate::message::Message;
use crate::protocol::Frame;
use crate::requeue::RequeueStrategy;

/// What a subscribed connection delivers to: topic, channel and callback.
#[derive(Clone)]
pub struct Subscription {
    topic: Arc<str>,
    channel: Arc<str>,
    handler: Arc<dyn Handler>,
}

impl Subscription {
    pub fn new(topic: &str, channel: &str, handler: Arc<dyn Handler>) -> Self {
        Self {
            topic: Arc::from(topic),
            channel: Arc::from(channel),
            handler,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Why a message was finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The callback succeeded.
    Processed,
    /// Dedupe reported the message as already seen; the callback was skipped.
    Duplicate,
    /// The callback (or a collaborator) failed and the message will not be retried.
    Abandoned,
}

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Heartbeat answered with NOP.
    Nop,
    /// Command acknowledgement; nothing written.
    Ignored,
    /// FIN then RDY written.
    Finished(FinishReason),
    /// REQ with this delay then RDY written.
    Requeued(Duration),
}

/// Runs the message lifecycle against the injected collaborators.
pub struct Dispatcher {
    dedupe: Arc<dyn Dedupe>,
    requeue: Arc<dyn RequeueStrategy>,
}

impl Dispatcher {
    pub fn new(dedupe: Arc<dyn Dedupe>, requeue: Arc<dyn RequeueStrategy>) -> Self {
        Self { dedupe, requeue }
    }

    /// Handle one frame read from `connection`.
    ///
    /// # Errors
    ///
    /// `UnexpectedFrame` for error frames and unknown responses, `Protocol`
    /// for a malformed message frame, and transport errors from writing.
    /// Callback and collaborator failures never surface here.
    pub async fn dispatch(
        &self,
        connection: &mut Connection,
        subscription: &Subscription,
        frame: Frame,
    ) -> Result<Disposition> {
        if frame.is_heartbeat() {
            tracing::debug!(connection = %connection.id(), "heartbeat");
            connection.nop().await?;
            return Ok(Disposition::Nop);
        }

        if frame.is_message() {
            let message = Message::from_frame(
                &frame,
                subscription.topic.clone(),
                subscription.channel.clone(),
            )?;
            return self.process(connection, subscription, message).await;
        }

        if frame.is_acknowledgement() {
            tracing::debug!(
                connection = %connection.id(),
                "ignoring {:?} response",
                String::from_utf8_lossy(frame.payload())
            );
            return Ok(Disposition::Ignored);
        }

        Err(NsqError::UnexpectedFrame {
            frame_type: frame.frame_type,
            payload: frame.payload,
        })
    }

    async fn process(
        &self,
        connection: &mut Connection,
        subscription: &Subscription,
        message: Message,
    ) -> Result<Disposition> {
        let (topic, channel) = (subscription.topic(), subscription.channel());
        let id = message.id();

        if !connection.on_delivery() {
            tracing::warn!(
                connection = %connection.id(),
                id = %id,
                in_flight = connection.credit().in_flight(),
                "message delivered without outstanding RDY credit"
            );
        }

        let reason = match self.dedupe.contains_and_add(topic, channel, &message) {
            Ok(true) => {
                tracing::debug!(id = %id, topic, channel, "duplicate, skipping callback");
                FinishReason::Duplicate
            }
            Ok(false) => match run_callback(subscription, message.clone()).await {
                Ok(()) => FinishReason::Processed,
                Err(e) => {
                    tracing::warn!(
                        id = %id,
                        attempts = message.attempts(),
                        topic,
                        channel,
                        "callback failed: {}",
                        e
                    );
                    if let Err(e) = self.dedupe.erase(topic, channel, &message) {
                        tracing::warn!(id = %id, "dedupe erase failed: {}", e);
                    }
                    match self.requeue.should_requeue(&message) {
                        Ok(Some(delay)) => {
                            connection.requeue(id, delay).await?;
                            connection.ready(READY_COUNT).await?;
                            tracing::info!(
                                id = %id,
                                delay_ms = delay.as_millis() as u64,
                                "requeued"
                            );
                            return Ok(Disposition::Requeued(delay));
                        }
                        Ok(None) => FinishReason::Abandoned,
                        Err(e) => {
                            tracing::warn!(id = %id, "requeue strategy failed: {}", e);
                            FinishReason::Abandoned
                        }
                    }
                }
            },
            Err(e) => {
                tracing::warn!(
                    id = %id,
                    topic,
                    channel,
                    "dedupe failed, abandoning: {}",
                    e
                );
                FinishReason::Abandoned
            }
        };

        connection.finish(id).await?;
        connection.ready(READY_COUNT).await?;
        if reason == FinishReason::Abandoned {
            tracing::info!(id = %id, topic, channel, "abandoned");
        }
        Ok(Disposition::Finished(reason))
    }
}

/// Run the callback, turning a panic into an ordinary failure.
async fn run_callback(subscription: &Subscription, message: Message) -> HandlerResult {
    // `call` itself may panic before returning its future
    let call = async { subscription.handler.call(message).await };
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(format!("callback panicked: {}", panic_message(&*panic)).into()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(
            Arc::new(crate::dedupe::NoDedupe),
            Arc::new(crate::requeue::NoRequeue),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::dedupe::{MemoryDedupe, NoDedupe};
    use crate::error::BoxError;
    use crate::handler::FnHandler;
    use crate::message::{encode_message_payload, MessageId};
    use crate::pool::ConnectionId;
    use crate::protocol::{FrameType, HEARTBEAT};
    use crate::requeue::{FixedDelay, NoRequeue};
    use crate::transport::HostAddr;
    use crate::writer::WriterConfig;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    const ID: &[u8; 16] = b"abcd000000001234";

    struct FailingDedupe;

    impl Dedupe for FailingDedupe {
        fn contains_and_add(
            &self,
            _: &str,
            _: &str,
            _: &Message,
        ) -> std::result::Result<bool, BoxError> {
            Err("store offline".into())
        }
    }

    struct FailingStrategy;

    impl RequeueStrategy for FailingStrategy {
        fn should_requeue(
            &self,
            _: &Message,
        ) -> std::result::Result<Option<Duration>, BoxError> {
            Err("strategy offline".into())
        }
    }

    fn connection() -> (Connection, DuplexStream) {
        let (client, server) = duplex(4096);
        let connection = Connection::with_writer(
            ConnectionId::new(1),
            HostAddr::new("10.0.0.1", 4150),
            Timeouts::default(),
            client,
            WriterConfig::default(),
        );
        (connection, server)
    }

    fn subscription(fail: bool, calls: Arc<AtomicUsize>) -> Subscription {
        let handler = FnHandler::new(move |_message: Message| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err("callback failed".into())
                } else {
                    Ok(())
                }
            }
        });
        Subscription::new("orders", "billing", Arc::new(handler))
    }

    fn panicking_subscription() -> Subscription {
        let handler = FnHandler::new(|message: Message| async move {
            if message.attempts() > 0 {
                panic!("bad payload {}", message.id());
            }
            Ok(())
        });
        Subscription::new("orders", "billing", Arc::new(handler))
    }

    /// Dedupe store that logs each query into a shared journal.
    struct RecordingDedupe {
        journal: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Dedupe for RecordingDedupe {
        fn contains_and_add(
            &self,
            _: &str,
            _: &str,
            _: &Message,
        ) -> std::result::Result<bool, BoxError> {
            self.journal.lock().unwrap().push("dedupe");
            Ok(false)
        }

        fn erase(&self, _: &str, _: &str, _: &Message) -> std::result::Result<(), BoxError> {
            self.journal.lock().unwrap().push("erase");
            Ok(())
        }
    }

    /// Run one delivery with a journaling dedupe and callback.
    async fn journaled(
        fail: bool,
        requeue: Arc<dyn RequeueStrategy>,
    ) -> (Disposition, Vec<&'static str>, String) {
        let (mut conn, server) = connection();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let dedupe = RecordingDedupe {
            journal: journal.clone(),
        };
        let log = journal.clone();
        let handler = FnHandler::new(move |_message: Message| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push("callback");
                if fail {
                    Err("callback failed".into())
                } else {
                    Ok(())
                }
            }
        });
        let sub = Subscription::new("orders", "billing", Arc::new(handler));
        let dispatcher = Dispatcher::new(Arc::new(dedupe), requeue);

        let outcome = dispatcher.dispatch(&mut conn, &sub, message_frame()).await.unwrap();
        let events = journal.lock().unwrap().clone();
        (outcome, events, written(conn, server).await)
    }

    fn message_frame() -> Frame {
        let payload = encode_message_payload(&MessageId::new(*ID), 0, 1, br#"{"x":1}"#);
        Frame::new(FrameType::Message, Bytes::from(payload))
    }

    /// Close the connection and collect everything it wrote, CLS excluded.
    async fn written(connection: Connection, mut server: DuplexStream) -> String {
        connection.close().await.unwrap();
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        text.strip_suffix("CLS\n").unwrap().to_string()
    }

    #[tokio::test]
    async fn test_success_finishes_and_requests_next() {
        let (mut conn, server) = connection();
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(Arc::new(NoDedupe), Arc::new(NoRequeue));

        let outcome = dispatcher
            .dispatch(&mut conn, &subscription(false, calls.clone()), message_frame())
            .await
            .unwrap();

        assert_eq!(outcome, Disposition::Finished(FinishReason::Processed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(written(conn, server).await, "FIN abcd000000001234\nRDY 1\n");
    }

    #[tokio::test]
    async fn test_duplicate_skips_callback_but_finishes() {
        let (mut conn, server) = connection();
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(Arc::new(MemoryDedupe::new(64)), Arc::new(NoRequeue));
        let sub = subscription(false, calls.clone());

        dispatcher.dispatch(&mut conn, &sub, message_frame()).await.unwrap();
        let outcome = dispatcher.dispatch(&mut conn, &sub, message_frame()).await.unwrap();

        assert_eq!(outcome, Disposition::Finished(FinishReason::Duplicate));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            written(conn, server).await,
            "FIN abcd000000001234\nRDY 1\nFIN abcd000000001234\nRDY 1\n"
        );
    }

    #[tokio::test]
    async fn test_failure_with_delay_requeues_without_finish() {
        let (mut conn, server) = connection();
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = FixedDelay::new(Duration::from_millis(5000), 5);
        let dispatcher = Dispatcher::new(Arc::new(NoDedupe), Arc::new(strategy));

        let outcome = dispatcher
            .dispatch(&mut conn, &subscription(true, calls), message_frame())
            .await
            .unwrap();

        assert_eq!(outcome, Disposition::Requeued(Duration::from_millis(5000)));
        assert_eq!(conn.credit().in_flight(), 0);
        assert_eq!(written(conn, server).await, "REQ abcd000000001234 5000\nRDY 1\n");
    }

    #[tokio::test]
    async fn test_failure_without_requeue_is_abandoned() {
        let (mut conn, server) = connection();
        let dispatcher = Dispatcher::default();

        let outcome = dispatcher
            .dispatch(&mut conn, &subscription(true, Arc::default()), message_frame())
            .await
            .unwrap();

        assert_eq!(outcome, Disposition::Finished(FinishReason::Abandoned));
        assert_eq!(written(conn, server).await, "FIN abcd000000001234\nRDY 1\n");
    }

    #[tokio::test]
    async fn test_failed_message_is_erased_from_dedupe() {
        let (mut conn, server) = connection();
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = FixedDelay::new(Duration::from_millis(10), 5);
        let dispatcher = Dispatcher::new(Arc::new(MemoryDedupe::new(64)), Arc::new(strategy));
        let sub = subscription(true, calls.clone());

        dispatcher.dispatch(&mut conn, &sub, message_frame()).await.unwrap();
        // Redelivery runs the callback again instead of being skipped
        let outcome = dispatcher.dispatch(&mut conn, &sub, message_frame()).await.unwrap();

        assert_eq!(outcome, Disposition::Requeued(Duration::from_millis(10)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let _ = written(conn, server).await;
    }

    #[tokio::test]
    async fn test_collaborator_failures_abandon() {
        let (mut conn, server) = connection();
        let calls = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher::new(Arc::new(FailingDedupe), Arc::new(NoRequeue));
        let outcome = dispatcher
            .dispatch(&mut conn, &subscription(false, calls.clone()), message_frame())
            .await
            .unwrap();
        assert_eq!(outcome, Disposition::Finished(FinishReason::Abandoned));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let dispatcher = Dispatcher::new(Arc::new(NoDedupe), Arc::new(FailingStrategy));
        let outcome = dispatcher
            .dispatch(&mut conn, &subscription(true, calls.clone()), message_frame())
            .await
            .unwrap();
        assert_eq!(outcome, Disposition::Finished(FinishReason::Abandoned));

        assert_eq!(
            written(conn, server).await,
            "FIN abcd000000001234\nRDY 1\nFIN abcd000000001234\nRDY 1\n"
        );
    }

    #[tokio::test]
    async fn test_heartbeat_only_writes_nop() {
        let (mut conn, server) = connection();
        let calls = Arc::new(AtomicUsize::new(0));
        let heartbeat = Frame::new(FrameType::Response, Bytes::from_static(HEARTBEAT));

        let outcome = Dispatcher::default()
            .dispatch(&mut conn, &subscription(false, calls.clone()), heartbeat)
            .await
            .unwrap();

        assert_eq!(outcome, Disposition::Nop);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(conn.credit().available(), 0);
        assert_eq!(written(conn, server).await, "NOP\n");
    }

    #[tokio::test]
    async fn test_ok_response_is_ignored() {
        let (mut conn, server) = connection();
        let ok = Frame::new(FrameType::Response, Bytes::from_static(b"OK"));

        let outcome = Dispatcher::default()
            .dispatch(&mut conn, &subscription(false, Arc::default()), ok)
            .await
            .unwrap();

        assert_eq!(outcome, Disposition::Ignored);
        assert_eq!(written(conn, server).await, "");
    }

    #[tokio::test]
    async fn test_error_frame_raises_with_payload() {
        let (mut conn, server) = connection();
        let frame = Frame::new(FrameType::Error, Bytes::from_static(b"E_INVALID cannot SUB"));

        let err = Dispatcher::default()
            .dispatch(&mut conn, &subscription(false, Arc::default()), frame)
            .await
            .unwrap_err();

        match err {
            NsqError::UnexpectedFrame {
                frame_type,
                payload,
            } => {
                assert_eq!(frame_type, FrameType::Error);
                assert_eq!(&payload[..], b"E_INVALID cannot SUB");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(written(conn, server).await, "");
    }

    #[tokio::test]
    async fn test_unknown_response_raises() {
        let (mut conn, _server) = connection();
        let frame = Frame::new(FrameType::Response, Bytes::from_static(b"WHAT"));

        let result = Dispatcher::default()
            .dispatch(&mut conn, &subscription(false, Arc::default()), frame)
            .await;

        assert!(matches!(
            result,
            Err(NsqError::UnexpectedFrame { frame_type: FrameType::Response, .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_message_is_protocol_error() {
        let (mut conn, _server) = connection();
        let frame = Frame::new(FrameType::Message, Bytes::from_static(b"short"));

        let result = Dispatcher::default()
            .dispatch(&mut conn, &subscription(false, Arc::default()), frame)
            .await;

        assert!(matches!(result, Err(NsqError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_panicking_callback_is_requeued() {
        let (mut conn, server) = connection();
        let strategy = FixedDelay::new(Duration::from_millis(5000), 5);
        let dispatcher = Dispatcher::new(Arc::new(MemoryDedupe::new(64)), Arc::new(strategy));
        let sub = panicking_subscription();

        let outcome = dispatcher.dispatch(&mut conn, &sub, message_frame()).await.unwrap();
        assert_eq!(outcome, Disposition::Requeued(Duration::from_millis(5000)));

        // Erased after the panic, so the redelivery reaches the callback again
        let outcome = dispatcher.dispatch(&mut conn, &sub, message_frame()).await.unwrap();
        assert_eq!(outcome, Disposition::Requeued(Duration::from_millis(5000)));

        assert_eq!(
            written(conn, server).await,
            "REQ abcd000000001234 5000\nRDY 1\nREQ abcd000000001234 5000\nRDY 1\n"
        );
    }

    #[tokio::test]
    async fn test_panicking_callback_without_requeue_is_abandoned() {
        let (mut conn, server) = connection();

        let outcome = Dispatcher::default()
            .dispatch(&mut conn, &panicking_subscription(), message_frame())
            .await
            .unwrap();

        assert_eq!(outcome, Disposition::Finished(FinishReason::Abandoned));
        assert_eq!(written(conn, server).await, "FIN abcd000000001234\nRDY 1\n");
    }

    #[tokio::test]
    async fn test_panic_in_call_itself_is_contained() {
        struct Broken;

        impl Handler for Broken {
            fn call(&self, _message: Message) -> crate::handler::BoxFuture<'static, HandlerResult> {
                panic!("no future for you");
            }
        }

        let (mut conn, server) = connection();
        let sub = Subscription::new("orders", "billing", Arc::new(Broken));

        let outcome = Dispatcher::default()
            .dispatch(&mut conn, &sub, message_frame())
            .await
            .unwrap();

        assert_eq!(outcome, Disposition::Finished(FinishReason::Abandoned));
        assert_eq!(written(conn, server).await, "FIN abcd000000001234\nRDY 1\n");
    }

    #[test]
    fn test_panic_message_reads_str_and_string_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let formatted: Box<dyn Any + Send> = Box::new(format!("boom {}", 7));
        let other: Box<dyn Any + Send> = Box::new(7u8);

        assert_eq!(panic_message(&*literal), "boom");
        assert_eq!(panic_message(&*formatted), "boom 7");
        assert_eq!(panic_message(&*other), "non-string payload");
    }

    #[tokio::test]
    async fn test_dedupe_is_queried_once_before_callback_on_success() {
        let (outcome, events, wire) = journaled(false, Arc::new(NoRequeue)).await;

        assert_eq!(outcome, Disposition::Finished(FinishReason::Processed));
        assert_eq!(events, vec!["dedupe", "callback"]);
        assert_eq!(wire, "FIN abcd000000001234\nRDY 1\n");
    }

    #[tokio::test]
    async fn test_dedupe_is_queried_once_before_callback_on_requeue() {
        let strategy = FixedDelay::new(Duration::from_millis(5000), 5);
        let (outcome, events, wire) = journaled(true, Arc::new(strategy)).await;

        assert_eq!(outcome, Disposition::Requeued(Duration::from_millis(5000)));
        assert_eq!(events, vec!["dedupe", "callback", "erase"]);
        assert_eq!(wire, "REQ abcd000000001234 5000\nRDY 1\n");
    }

    #[tokio::test]
    async fn test_dedupe_is_queried_once_before_callback_on_abandon() {
        let (outcome, events, wire) = journaled(true, Arc::new(NoRequeue)).await;

        assert_eq!(outcome, Disposition::Finished(FinishReason::Abandoned));
        assert_eq!(events, vec!["dedupe", "callback", "erase"]);
        assert_eq!(wire, "FIN abcd000000001234\nRDY 1\n");
    }
}
