//! Consumer egress
//!
//! A consumer connection registers itself as the session's only consumer,
//! receives the cached init segment first, and from then on is a pure
//! receiver of relayed frames. Inbound frames are drained only to notice
//! close and errors.

use std::fmt::Display;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};

use crate::error::{Error, Result};
use crate::registry::{ConsumerHandle, SessionId, SessionRegistry};
use crate::session::{ConnectionContext, ConsumerState};
use crate::stats::ConnectionStats;

/// Unregisters the consumer however the connection task ends
struct ConsumerGuard<'a> {
    registry: &'a SessionRegistry,
    session: &'a SessionId,
    handle: ConsumerHandle,
}

impl Drop for ConsumerGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister_consumer(self.session, &self.handle);
    }
}

/// Why the consumer loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The peer closed or its read side failed
    Disconnected,
    /// A newer consumer replaced this one
    Evicted,
}

/// Run the consumer protocol loop until disconnect or eviction
///
/// The caller must already have authenticated the connection. Failing to
/// deliver the cached init segment is returned as an error.
pub async fn run_consumer<Tx, Rx, E>(
    registry: &SessionRegistry,
    ctx: &ConnectionContext,
    mut outbound: Tx,
    mut inbound: Rx,
    stats: &mut ConnectionStats,
) -> Result<ConsumerExit>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    let session = &ctx.session_id;
    let mut state = ConsumerState::new();
    let (handle, mut receiver) = ConsumerHandle::new(registry.config().consumer_queue_capacity);

    registry.register_consumer(session, handle.clone());
    let _guard = ConsumerGuard {
        registry,
        session,
        handle,
    };

    // Frames relayed while this is in flight wait in the queue, so the
    // segment always reaches the socket first.
    let mut sent_segment = None;
    if let Some(segment) = registry.get_init_segment(session) {
        let len = segment.len();
        outbound
            .send(Message::Binary(segment.to_vec()))
            .await
            .map_err(Error::transport)?;
        stats.record_sent(len);
        tracing::debug!(
            connection_id = ctx.connection_id,
            session = %session,
            bytes = len,
            "Init segment sent"
        );
        sent_segment = Some(segment);
    }

    state.register();

    let evicted = receiver.closed();
    tokio::pin!(evicted);

    let exit = loop {
        tokio::select! {
            biased;

            _ = &mut evicted => {
                tracing::info!(
                    connection_id = ctx.connection_id,
                    session = %session,
                    "Consumer evicted by newer connection"
                );
                let _ = outbound.send(Message::Close(None)).await;
                break ConsumerExit::Evicted;
            }

            frame = receiver.recv() => {
                let Some(frame) = frame else {
                    break ConsumerExit::Disconnected;
                };
                // Registering between the producer caching its first frame and
                // relaying it queues that same frame behind the direct send.
                if sent_segment
                    .take()
                    .is_some_and(|segment| is_same_frame(&segment, &frame))
                {
                    continue;
                }
                let len = frame.len();
                if let Err(e) = outbound.send(Message::Binary(frame.to_vec())).await {
                    tracing::debug!(
                        connection_id = ctx.connection_id,
                        error = %e,
                        "Consumer write error"
                    );
                    break ConsumerExit::Disconnected;
                }
                stats.record_sent(len);
            }

            message = inbound.next() => match message {
                Some(Ok(Message::Close(_))) | None => break ConsumerExit::Disconnected,
                Some(Ok(_)) => {
                    stats.frames_ignored += 1;
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        connection_id = ctx.connection_id,
                        error = %e,
                        "Consumer read error"
                    );
                    break ConsumerExit::Disconnected;
                }
            },
        }
    };

    state.close();
    Ok(exit)
}

/// Whether two frames share one allocation
fn is_same_frame(a: &Bytes, b: &Bytes) -> bool {
    a.as_ptr() == b.as_ptr() && a.len() == b.len()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use futures::channel::mpsc;

    use super::*;
    use crate::session::Role;

    type Inbound = mpsc::UnboundedSender<std::result::Result<Message, String>>;
    type Outbound = mpsc::UnboundedReceiver<Message>;

    fn ctx(session: &str) -> ConnectionContext {
        let addr: SocketAddr = "127.0.0.1:5001".parse().unwrap();
        ConnectionContext::new(2, addr, SessionId::new(session), Role::Consumer)
    }

    /// Spawn a consumer loop wired to in-memory channels
    fn spawn_consumer(
        registry: &std::sync::Arc<SessionRegistry>,
        session: &str,
    ) -> (
        Inbound,
        Outbound,
        tokio::task::JoinHandle<Result<ConsumerExit>>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded::<std::result::Result<Message, String>>();
        let registry = std::sync::Arc::clone(registry);
        let ctx = ctx(session);

        let task = tokio::spawn(async move {
            let mut stats = ConnectionStats::new();
            run_consumer(&registry, &ctx, out_tx, in_rx, &mut stats).await
        });

        (in_tx, out_rx, task)
    }

    async fn next_binary(out: &mut Outbound) -> Vec<u8> {
        match tokio::time::timeout(Duration::from_secs(2), out.next()).await {
            Ok(Some(Message::Binary(data))) => data,
            other => panic!("expected binary frame, got {:?}", other),
        }
    }

    async fn wait_for_consumer(registry: &SessionRegistry, session: &SessionId) -> ConsumerHandle {
        for _ in 0..200 {
            if let Some(handle) = registry.get_consumer(session) {
                return handle;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("consumer never registered");
    }

    #[tokio::test]
    async fn test_init_segment_sent_before_live_frames() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let s1 = SessionId::new("s1");
        registry.set_init_segment_if_absent(&s1, Bytes::from_static(b"H"));

        let (_in_tx, mut out, _task) = spawn_consumer(&registry, "s1");
        let handle = wait_for_consumer(&registry, &s1).await;
        handle.forward(Bytes::from_static(b"F1")).unwrap();

        assert_eq!(next_binary(&mut out).await, b"H");
        assert_eq!(next_binary(&mut out).await, b"F1");
    }

    #[tokio::test]
    async fn test_queued_copy_of_init_segment_not_sent_twice() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let s1 = SessionId::new("s1");
        let segment = Bytes::from(b"H".to_vec());
        registry.set_init_segment_if_absent(&s1, segment.clone());

        let (_in_tx, mut out, _task) = spawn_consumer(&registry, "s1");
        let handle = wait_for_consumer(&registry, &s1).await;
        // The producer relays the frame it just cached
        handle.forward(segment).unwrap();
        handle.forward(Bytes::from_static(b"F1")).unwrap();

        assert_eq!(next_binary(&mut out).await, b"H");
        assert_eq!(next_binary(&mut out).await, b"F1");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), out.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_equal_bytes_from_another_frame_still_relayed() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let s1 = SessionId::new("s1");
        registry.set_init_segment_if_absent(&s1, Bytes::from(b"H".to_vec()));

        let (_in_tx, mut out, _task) = spawn_consumer(&registry, "s1");
        let handle = wait_for_consumer(&registry, &s1).await;
        handle.forward(Bytes::from(b"H".to_vec())).unwrap();

        assert_eq!(next_binary(&mut out).await, b"H");
        assert_eq!(next_binary(&mut out).await, b"H");
    }

    #[tokio::test]
    async fn test_no_init_segment_still_registers() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let s1 = SessionId::new("s1");

        let (_in_tx, mut out, _task) = spawn_consumer(&registry, "s1");
        let handle = wait_for_consumer(&registry, &s1).await;
        handle.forward(Bytes::from_static(b"F1")).unwrap();

        assert_eq!(next_binary(&mut out).await, b"F1");
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let s1 = SessionId::new("s1");

        let (in_tx, _out, task) = spawn_consumer(&registry, "s1");
        wait_for_consumer(&registry, &s1).await;

        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        let exit = task.await.unwrap().unwrap();

        assert_eq!(exit, ConsumerExit::Disconnected);
        assert!(registry.get_consumer(&s1).is_none());
    }

    #[tokio::test]
    async fn test_read_error_unregisters() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let s1 = SessionId::new("s1");

        let (in_tx, _out, task) = spawn_consumer(&registry, "s1");
        wait_for_consumer(&registry, &s1).await;

        in_tx.unbounded_send(Err("reset".to_string())).unwrap();
        assert_eq!(task.await.unwrap().unwrap(), ConsumerExit::Disconnected);
        assert!(registry.get_consumer(&s1).is_none());
    }

    #[tokio::test]
    async fn test_control_frames_are_drained() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let s1 = SessionId::new("s1");

        let (in_tx, _out, task) = spawn_consumer(&registry, "s1");
        wait_for_consumer(&registry, &s1).await;

        in_tx.unbounded_send(Ok(Message::Ping(vec![1]))).unwrap();
        in_tx.unbounded_send(Ok(Message::Text("hi".into()))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert!(registry.get_consumer(&s1).is_some());

        drop(in_tx);
        assert_eq!(task.await.unwrap().unwrap(), ConsumerExit::Disconnected);
    }

    #[tokio::test]
    async fn test_newer_consumer_evicts_older() {
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let s1 = SessionId::new("s1");

        let (_in1, mut out1, task1) = spawn_consumer(&registry, "s1");
        let first = wait_for_consumer(&registry, &s1).await;

        let (_in2, mut out2, _task2) = spawn_consumer(&registry, "s1");
        let mut second = wait_for_consumer(&registry, &s1).await;
        for _ in 0..200 {
            if !second.same(&first) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            second = wait_for_consumer(&registry, &s1).await;
        }

        assert_eq!(task1.await.unwrap().unwrap(), ConsumerExit::Evicted);
        assert!(matches!(out1.next().await, Some(Message::Close(None))));

        // The evicted consumer's teardown must not unregister its successor
        assert!(registry.get_consumer(&s1).unwrap().same(&second));
        second.forward(Bytes::from_static(b"F2")).unwrap();
        assert_eq!(next_binary(&mut out2).await, b"F2");
    }

    #[tokio::test]
    async fn test_init_segment_send_failure_is_fatal() {
        let registry = SessionRegistry::new();
        let ctx = ctx("s1");
        registry.set_init_segment_if_absent(&ctx.session_id, Bytes::from_static(b"H"));

        let (out_tx, out_rx) = mpsc::unbounded::<Message>();
        drop(out_rx);
        let (_in_tx, in_rx) = mpsc::unbounded::<std::result::Result<Message, String>>();

        let mut stats = ConnectionStats::new();
        let result = run_consumer(&registry, &ctx, out_tx, in_rx, &mut stats).await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(registry.get_consumer(&ctx.session_id).is_none());
    }
}
