//! Producer ingress
//!
//! Reads binary frames from a producer connection. For every frame, in order:
//!
//! 1. the first frame of the connection is offered to the registry as the
//!    session's init segment,
//! 2. the frame is appended to the capture sink,
//! 3. the frame is forwarded to the session's consumer, if one is registered.
//!
//! Sink and relay failures are logged and never end the producer's stream.

use std::fmt::Display;
use std::pin::pin;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::registry::{ProducerId, RelayError, SessionId, SessionRegistry};
use crate::session::{ConnectionContext, ProducerState};
use crate::sink::CaptureWriter;
use crate::stats::ConnectionStats;

/// Detaches the producer however the connection task ends
struct ProducerGuard<'a> {
    registry: &'a SessionRegistry,
    session: &'a SessionId,
    id: ProducerId,
}

impl Drop for ProducerGuard<'_> {
    fn drop(&mut self) {
        self.registry.detach_producer(self.session, self.id);
    }
}

/// Run the producer protocol loop until the peer disconnects
///
/// `capture` is the sink writer opened for this connection; it is closed
/// before returning.
pub async fn run_producer<R, E, W>(
    registry: &SessionRegistry,
    ctx: &ConnectionContext,
    frames: R,
    mut capture: W,
) -> ConnectionStats
where
    R: Stream<Item = Result<Message, E>>,
    E: Display,
    W: CaptureWriter,
{
    let session = &ctx.session_id;
    let mut frames = pin!(frames);
    let mut state = ProducerState::new();
    let mut stats = ConnectionStats::new();

    let _guard = ProducerGuard {
        registry,
        session,
        id: registry.attach_producer(session),
    };

    while let Some(next) = frames.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(
                    connection_id = ctx.connection_id,
                    session = %session,
                    error = %e,
                    "Producer read error"
                );
                break;
            }
        };

        match message {
            Message::Binary(data) => {
                let frame = Bytes::from(data);
                stats.record_received(frame.len());
                handle_frame(registry, ctx, &mut state, &mut stats, &mut capture, frame).await;
            }
            Message::Close(_) => break,
            _ => {
                stats.frames_ignored += 1;
                tracing::trace!(
                    connection_id = ctx.connection_id,
                    "Ignoring non-binary producer frame"
                );
            }
        }
    }

    state.close();

    if let Err(e) = capture.close().await {
        tracing::warn!(session = %session, error = %e, "Failed to close capture");
    }

    stats
}

async fn handle_frame<W: CaptureWriter>(
    registry: &SessionRegistry,
    ctx: &ConnectionContext,
    state: &mut ProducerState,
    stats: &mut ConnectionStats,
    capture: &mut W,
    frame: Bytes,
) {
    let session = &ctx.session_id;

    if state.on_binary_frame() {
        let cached = registry.set_init_segment_if_absent(session, frame.clone());
        tracing::info!(
            connection_id = ctx.connection_id,
            session = %session,
            bytes = frame.len(),
            cached_as_init_segment = cached,
            waited_ms = state.duration().as_millis() as u64,
            "Producer streaming"
        );
    }

    if let Err(e) = capture.append(&frame).await {
        stats.sink_failures += 1;
        tracing::warn!(
            session = %session,
            error = %e,
            "Capture append failed, continuing"
        );
    }

    let Some(consumer) = registry.get_consumer(session) else {
        return;
    };

    match consumer.forward(frame) {
        Ok(()) => stats.frames_relayed += 1,
        Err(e) => {
            stats.relay_failures += 1;
            tracing::warn!(
                session = %session,
                consumer = consumer.id(),
                error = %e,
                "Relay to consumer failed"
            );

            if e == RelayError::ConsumerClosed && registry.config().evict_on_relay_failure {
                registry.unregister_consumer(session, &consumer);
            }
        }
    }
}
