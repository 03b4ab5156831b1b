//! Session registry implementation
//!
//! The central registry that maps sessions to their single consumer and
//! cached init segment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;

use super::config::{InitSegmentPolicy, RegistryConfig};
use super::entry::{SessionEntry, SessionStats};
use super::frame::{ProducerId, SessionId};
use super::handle::ConsumerHandle;

/// Central registry for all sessions
///
/// Backed by a sharded `DashMap`, so unrelated sessions rarely contend.
/// Every operation holds a shard lock only for the map access itself;
/// handles are closed after the lock is released.
pub struct SessionRegistry {
    /// Map of session id to session entry
    sessions: DashMap<SessionId, SessionEntry>,

    /// Configuration
    config: RegistryConfig,

    next_producer_id: AtomicU64,

    /// Consumers closed because a newer one registered
    evictions: AtomicU64,
}

impl SessionRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            next_producer_id: AtomicU64::new(1),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register the consumer for a session
    ///
    /// Any consumer already registered for the session is replaced and then
    /// closed. Always succeeds.
    pub fn register_consumer(&self, session: &SessionId, handle: ConsumerHandle) {
        let previous = {
            let mut entry = self
                .sessions
                .entry(session.clone())
                .or_insert_with(SessionEntry::new);
            entry.vacated_at = None;
            entry.consumer.replace(handle.clone())
        };

        match previous {
            Some(prev) if !prev.same(&handle) => {
                prev.close();
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    session = %session,
                    evicted = prev.id(),
                    consumer = handle.id(),
                    "Consumer replaced, previous consumer evicted"
                );
            }
            _ => {
                tracing::info!(
                    session = %session,
                    consumer = handle.id(),
                    "Consumer registered"
                );
            }
        }
    }

    /// Unregister a consumer
    ///
    /// Only removes the mapping if `handle` is still the registered consumer,
    /// so a stale disconnect never evicts a newer consumer. Returns whether
    /// anything was removed.
    pub fn unregister_consumer(&self, session: &SessionId, handle: &ConsumerHandle) -> bool {
        let removed = match self.sessions.get_mut(session) {
            Some(mut entry) => {
                let is_current = entry
                    .consumer
                    .as_ref()
                    .is_some_and(|current| current.same(handle));
                if is_current {
                    entry.consumer = None;
                    entry.mark_vacated_if_empty();
                }
                is_current
            }
            None => false,
        };

        if removed {
            handle.close();
            tracing::info!(
                session = %session,
                consumer = handle.id(),
                "Consumer unregistered"
            );
        } else {
            tracing::debug!(
                session = %session,
                consumer = handle.id(),
                "Consumer already replaced, unregister ignored"
            );
        }

        removed
    }

    /// Get the consumer registered for a session
    ///
    /// The handle may be closed by the time the caller uses it.
    pub fn get_consumer(&self, session: &SessionId) -> Option<ConsumerHandle> {
        self.sessions
            .get(session)
            .and_then(|entry| entry.consumer.clone())
    }

    /// Cache the init segment unless one is already stored
    ///
    /// Returns `true` if this call stored the segment.
    pub fn set_init_segment_if_absent(&self, session: &SessionId, segment: Bytes) -> bool {
        let mut entry = self
            .sessions
            .entry(session.clone())
            .or_insert_with(SessionEntry::new);

        if entry.init_segment.is_some() {
            return false;
        }

        tracing::debug!(
            session = %session,
            bytes = segment.len(),
            "Init segment cached"
        );
        entry.init_segment = Some(segment);
        true
    }

    /// Get the cached init segment for a session
    pub fn get_init_segment(&self, session: &SessionId) -> Option<Bytes> {
        self.sessions
            .get(session)
            .and_then(|entry| entry.init_segment.clone())
    }

    /// Attach a producer to a session
    ///
    /// The newest producer always becomes current; an older one that is still
    /// streaming keeps working but its eventual detach is ignored.
    pub fn attach_producer(&self, session: &SessionId) -> ProducerId {
        let id = ProducerId(self.next_producer_id.fetch_add(1, Ordering::Relaxed));

        let mut entry = self
            .sessions
            .entry(session.clone())
            .or_insert_with(SessionEntry::new);

        if let Some(previous) = entry.producer.replace(id) {
            tracing::debug!(
                session = %session,
                previous = %previous,
                producer = %id,
                "Producer superseded"
            );
        }
        entry.vacated_at = None;

        id
    }

    /// Detach a producer from a session
    ///
    /// Ignored unless `id` is the session's current producer. Under
    /// [`InitSegmentPolicy::ResetOnProducerDisconnect`] a matching detach also
    /// clears the cached init segment.
    pub fn detach_producer(&self, session: &SessionId, id: ProducerId) -> bool {
        let Some(mut entry) = self.sessions.get_mut(session) else {
            return false;
        };

        if entry.producer != Some(id) {
            tracing::debug!(
                session = %session,
                current = ?entry.producer,
                producer = %id,
                "Producer detach mismatch"
            );
            return false;
        }

        entry.producer = None;
        if self.config.init_segment_policy == InitSegmentPolicy::ResetOnProducerDisconnect
            && entry.init_segment.take().is_some()
        {
            tracing::info!(session = %session, "Init segment cleared on producer disconnect");
        }
        entry.mark_vacated_if_empty();

        true
    }

    /// Get session statistics
    pub fn session_stats(&self, session: &SessionId) -> Option<SessionStats> {
        self.sessions.get(session).map(|entry| entry.stats())
    }

    /// Get total number of sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of consumers evicted by a newer registration
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Run the idle sweep once
    ///
    /// Removes sessions with no consumer and no producer that have been
    /// vacant longer than `idle_session_timeout`. Does nothing when no
    /// timeout is configured.
    pub fn cleanup(&self) -> usize {
        let Some(timeout) = self.config.idle_session_timeout else {
            return 0;
        };

        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|session, entry| {
            let expired = entry.is_expired(now, timeout);
            if expired {
                tracing::info!(session = %session, "Session removed by cleanup");
            }
            !expired
        });

        before.saturating_sub(self.sessions.len())
    }

    /// Spawn the background idle sweep
    ///
    /// Returns `None` when no idle timeout is configured.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        self.config.idle_session_timeout?;

        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup();
            }
        }))
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
