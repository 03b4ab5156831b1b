//! Statistics and metrics for relay connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Connection-level statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// Connection start time
    pub started_at: Instant,
    /// Binary frames received from the peer
    pub frames_received: u64,
    /// Bytes received in binary frames
    pub bytes_received: u64,
    /// Non-binary frames skipped
    pub frames_ignored: u64,
    /// Sink appends that failed
    pub sink_failures: u64,
    /// Frames handed to a consumer
    pub frames_relayed: u64,
    /// Forward attempts that failed
    pub relay_failures: u64,
    /// Frames written to the peer
    pub frames_sent: u64,
    /// Bytes written to the peer
    pub bytes_sent: u64,
}

impl ConnectionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames_received: 0,
            bytes_received: 0,
            frames_ignored: 0,
            sink_failures: 0,
            frames_relayed: 0,
            relay_failures: 0,
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Record an inbound binary frame
    pub fn record_received(&mut self, len: usize) {
        self.frames_received += 1;
        self.bytes_received += len as u64;
    }

    /// Record an outbound binary frame
    pub fn record_sent(&mut self, len: usize) {
        self.frames_sent += 1;
        self.bytes_sent += len as u64;
    }

    /// Get duration since the connection started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Inbound bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-wide statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever upgraded
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Current producer connections
    pub active_producers: u64,
    /// Current consumer connections
    pub active_consumers: u64,
    /// Upgrades refused (origin, auth, limit)
    pub rejected_upgrades: u64,
    /// Total bytes received from producers
    pub total_bytes_received: u64,
    /// Total bytes sent to consumers
    pub total_bytes_sent: u64,
    /// Sessions currently held by the registry
    pub sessions: usize,
    /// Consumers closed because a newer one registered
    pub evictions: u64,
    /// Uptime
    pub uptime: Duration,
}

/// Live server counters shared by all connection tasks
#[derive(Debug)]
pub struct ServerCounters {
    started_at: Instant,
    total_connections: AtomicU64,
    active_producers: AtomicU64,
    active_consumers: AtomicU64,
    rejected_upgrades: AtomicU64,
    total_bytes_received: AtomicU64,
    total_bytes_sent: AtomicU64,
}

impl ServerCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_producers: AtomicU64::new(0),
            active_consumers: AtomicU64::new(0),
            rejected_upgrades: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            total_bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn producer_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_producers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn consumer_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_consumers.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished producer connection into the totals
    pub fn producer_closed(&self, stats: &ConnectionStats) {
        self.active_producers.fetch_sub(1, Ordering::Relaxed);
        self.total_bytes_received
            .fetch_add(stats.bytes_received, Ordering::Relaxed);
    }

    /// Fold a finished consumer connection into the totals
    pub fn consumer_closed(&self, stats: &ConnectionStats) {
        self.active_consumers.fetch_sub(1, Ordering::Relaxed);
        self.total_bytes_sent
            .fetch_add(stats.bytes_sent, Ordering::Relaxed);
    }

    pub fn upgrade_rejected(&self) {
        self.rejected_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> ServerStats {
        let active_producers = self.active_producers.load(Ordering::Relaxed);
        let active_consumers = self.active_consumers.load(Ordering::Relaxed);

        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: active_producers + active_consumers,
            active_producers,
            active_consumers,
            rejected_upgrades: self.rejected_upgrades.load(Ordering::Relaxed),
            total_bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            total_bytes_sent: self.total_bytes_sent.load(Ordering::Relaxed),
            sessions: 0,
            evictions: 0,
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for ServerCounters {
    fn default() -> Self {
        Self::new()
    }
}
