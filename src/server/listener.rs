//! Relay server listener
//!
//! Serves the WebSocket upgrade routes and spawns one task per relay
//! connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::CookieJar;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::trace::TraceLayer;

use crate::auth::{authenticate, Authenticator};
use crate::error::Result;
use crate::registry::{SessionId, SessionRegistry};
use crate::server::config::ServerConfig;
use crate::server::egress::run_consumer;
use crate::server::ingress::run_producer;
use crate::server::origin::OriginPolicy;
use crate::session::{ConnectionContext, Role};
use crate::sink::CaptureSink;
use crate::stats::{ConnectionStats, ServerCounters, ServerStats};

/// Shared state handed to every route
struct RelayState<S> {
    registry: Arc<SessionRegistry>,
    sink: Arc<S>,
    authenticator: Arc<dyn Authenticator>,
    origin_policy: Arc<OriginPolicy>,
    counters: Arc<ServerCounters>,
    next_connection_id: Arc<AtomicU64>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<S> Clone for RelayState<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
            authenticator: Arc::clone(&self.authenticator),
            origin_policy: Arc::clone(&self.origin_policy),
            counters: Arc::clone(&self.counters),
            next_connection_id: Arc::clone(&self.next_connection_id),
            connection_semaphore: self.connection_semaphore.clone(),
        }
    }
}

/// Live audio relay server
///
/// Owns the session registry and wires it, the capture sink and the
/// authenticator into the producer and consumer routes.
pub struct RelayServer<S: CaptureSink> {
    config: ServerConfig,
    state: RelayState<S>,
}

impl<S: CaptureSink> RelayServer<S> {
    /// Create a new server
    pub fn new(config: ServerConfig, sink: S, authenticator: Arc<dyn Authenticator>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let state = RelayState {
            registry: Arc::new(SessionRegistry::with_config(config.registry.clone())),
            sink: Arc::new(sink),
            authenticator,
            origin_policy: Arc::new(config.origin_policy.clone()),
            counters: Arc::new(ServerCounters::new()),
            next_connection_id: Arc::new(AtomicU64::new(1)),
            connection_semaphore,
        };

        Self { config, state }
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Snapshot of server-wide counters
    pub fn stats(&self) -> ServerStats {
        let mut stats = self.state.counters.snapshot();
        stats.sessions = self.state.registry.session_count();
        stats.evictions = self.state.registry.evictions();
        stats
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/kid/:session_id", get(producer_upgrade::<S>))
            .route("/ws/parent/:session_id", get(consumer_upgrade::<S>))
            .route("/health", get(|| async { "OK" }))
            .route("/", get(|| async { "Audio relay running" }))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(addr = %listener.local_addr()?, "Relay server listening");

        let cleanup_handle = self.state.registry.spawn_cleanup_task();

        let result = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
        })
        .await;

        if let Some(handle) = cleanup_handle {
            handle.abort();
        }

        Ok(result?)
    }
}

impl<S: CaptureSink> RelayState<S> {
    fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    fn reject(&self, status: StatusCode, reason: &'static str, peer: SocketAddr) -> Response {
        self.counters.upgrade_rejected();
        tracing::warn!(peer = %peer, status = status.as_u16(), reason, "Upgrade rejected");
        (status, reason).into_response()
    }

    fn check_origin(&self, headers: &HeaderMap, peer: SocketAddr) -> Option<Response> {
        if self.origin_policy.allows(headers) {
            None
        } else {
            Some(self.reject(StatusCode::FORBIDDEN, "Origin not allowed", peer))
        }
    }

    /// Session id parse and connection limit shared by both routes
    fn admit(
        &self,
        raw_session: &str,
        peer: SocketAddr,
    ) -> std::result::Result<(SessionId, Option<OwnedSemaphorePermit>), Response> {
        let Some(session) = SessionId::parse(raw_session) else {
            return Err(self.reject(StatusCode::BAD_REQUEST, "Invalid session id", peer));
        };

        let permit = match self.connection_semaphore {
            Some(ref sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return Err(self.reject(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Connection limit reached",
                        peer,
                    ));
                }
            },
            None => None,
        };

        Ok((session, permit))
    }

    async fn serve_producer(self, socket: WebSocket, ctx: ConnectionContext) {
        let capture = match self.sink.open(&ctx.session_id).await {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!(
                    connection_id = ctx.connection_id,
                    session = %ctx.session_id,
                    error = %e,
                    "Failed to open capture, closing producer"
                );
                return;
            }
        };

        self.counters.producer_opened();
        tracing::info!(
            connection_id = ctx.connection_id,
            session = %ctx.session_id,
            peer = %ctx.peer_addr,
            "Producer connected"
        );

        let stats = run_producer(&self.registry, &ctx, socket, capture).await;

        self.counters.producer_closed(&stats);
        let consumer_attached = self
            .registry
            .session_stats(&ctx.session_id)
            .is_some_and(|session| session.has_consumer);
        tracing::info!(
            connection_id = ctx.connection_id,
            session = %ctx.session_id,
            consumer_attached,
            frames = stats.frames_received,
            bytes = stats.bytes_received,
            relayed = stats.frames_relayed,
            sink_failures = stats.sink_failures,
            relay_failures = stats.relay_failures,
            bitrate_bps = stats.bitrate(),
            duration_ms = stats.duration().as_millis() as u64,
            "Producer disconnected"
        );
    }

    async fn serve_consumer(self, socket: WebSocket, ctx: ConnectionContext) {
        self.counters.consumer_opened();
        tracing::info!(
            connection_id = ctx.connection_id,
            session = %ctx.session_id,
            peer = %ctx.peer_addr,
            user_id = ?ctx.user_id(),
            "Consumer connected"
        );

        let (outbound, inbound) = socket.split();
        let mut stats = ConnectionStats::new();
        let result = run_consumer(&self.registry, &ctx, outbound, inbound, &mut stats).await;

        self.counters.consumer_closed(&stats);
        match result {
            Ok(exit) => tracing::info!(
                connection_id = ctx.connection_id,
                session = %ctx.session_id,
                exit = ?exit,
                frames = stats.frames_sent,
                bytes = stats.bytes_sent,
                duration_ms = stats.duration().as_millis() as u64,
                "Consumer disconnected"
            ),
            Err(e) => tracing::warn!(
                connection_id = ctx.connection_id,
                session = %ctx.session_id,
                error = %e,
                "Consumer connection failed"
            ),
        }
    }
}

async fn producer_upgrade<S: CaptureSink>(
    State(state): State<RelayState<S>>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(rejection) = state.check_origin(&headers, peer_addr) {
        return rejection;
    }

    let (session, permit) = match state.admit(&session_id, peer_addr) {
        Ok(admitted) => admitted,
        Err(rejection) => return rejection,
    };

    let ctx = ConnectionContext::new(state.next_connection_id(), peer_addr, session, Role::Producer);

    ws.on_upgrade(move |socket| async move {
        let _permit = permit;
        state.serve_producer(socket, ctx).await;
    })
}

async fn consumer_upgrade<S: CaptureSink>(
    State(state): State<RelayState<S>>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(rejection) = state.check_origin(&headers, peer_addr) {
        return rejection;
    }

    // Authenticate before anything touches the registry
    let identity = match authenticate(state.authenticator.as_ref(), &jar, &headers) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(peer = %peer_addr, error = %e, "Consumer credential rejected");
            return state.reject(StatusCode::UNAUTHORIZED, "Unauthorized", peer_addr);
        }
    };

    let (session, permit) = match state.admit(&session_id, peer_addr) {
        Ok(admitted) => admitted,
        Err(rejection) => return rejection,
    };

    let ctx = ConnectionContext::new(state.next_connection_id(), peer_addr, session, Role::Consumer)
        .with_identity(identity);

    ws.on_upgrade(move |socket| async move {
        let _permit = permit;
        state.serve_consumer(socket, ctx).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtAuthenticator;
    use crate::registry::ConsumerHandle;
    use crate::sink::MemorySink;

    #[test]
    fn test_stats_include_registry_counters() {
        let server = RelayServer::new(
            ServerConfig::default(),
            MemorySink::new(),
            Arc::new(JwtAuthenticator::hs256(b"secret")),
        );
        let s1 = SessionId::new("s1");
        let (first, _rx1) = ConsumerHandle::new(1);
        let (second, _rx2) = ConsumerHandle::new(1);

        server.registry().register_consumer(&s1, first);
        server.registry().register_consumer(&s1, second);

        let stats = server.stats();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.total_connections, 0);
    }
}
