//! Registry configuration

use std::str::FromStr;
use std::time::Duration;

/// What happens to a session's cached init segment when its producer leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitSegmentPolicy {
    /// The first segment ever cached is kept for the process lifetime
    #[default]
    FirstWriteWins,
    /// The segment is cleared when the current producer detaches, so a
    /// reconnecting producer (e.g. after an encoder restart) caches a new one
    ResetOnProducerDisconnect,
}

impl FromStr for InitSegmentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-write-wins" | "first_write_wins" => Ok(Self::FirstWriteWins),
            "reset-on-producer-disconnect" | "reset_on_producer_disconnect" => {
                Ok(Self::ResetOnProducerDisconnect)
            }
            other => Err(format!("unknown init segment policy: {}", other)),
        }
    }
}

/// Configuration for [`SessionRegistry`](super::SessionRegistry)
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Frames queued per consumer before forwards are rejected as lagging
    pub consumer_queue_capacity: usize,

    /// Init segment lifetime policy
    pub init_segment_policy: InitSegmentPolicy,

    /// Unregister a consumer from the producer side once a forward finds it closed
    pub evict_on_relay_failure: bool,

    /// Remove sessions with no participants after this long (None = never)
    pub idle_session_timeout: Option<Duration>,

    /// How often the idle sweep runs
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            consumer_queue_capacity: 256,
            init_segment_policy: InitSegmentPolicy::FirstWriteWins,
            evict_on_relay_failure: false,
            idle_session_timeout: None,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl RegistryConfig {
    /// Set the per-consumer queue capacity
    pub fn consumer_queue_capacity(mut self, capacity: usize) -> Self {
        self.consumer_queue_capacity = capacity.max(1);
        self
    }

    /// Set the init segment policy
    pub fn init_segment_policy(mut self, policy: InitSegmentPolicy) -> Self {
        self.init_segment_policy = policy;
        self
    }

    /// Enable or disable producer-side eviction of closed consumers
    pub fn evict_on_relay_failure(mut self, evict: bool) -> Self {
        self.evict_on_relay_failure = evict;
        self
    }

    /// Enable the idle sweep
    pub fn idle_session_timeout(mut self, timeout: Duration) -> Self {
        self.idle_session_timeout = Some(timeout);
        self
    }

    /// Set the idle sweep interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();

        assert_eq!(config.consumer_queue_capacity, 256);
        assert_eq!(config.init_segment_policy, InitSegmentPolicy::FirstWriteWins);
        assert!(!config.evict_on_relay_failure);
        assert!(config.idle_session_timeout.is_none());
    }

    #[test]
    fn test_builder_chaining() {
        let config = RegistryConfig::default()
            .consumer_queue_capacity(0)
            .init_segment_policy(InitSegmentPolicy::ResetOnProducerDisconnect)
            .evict_on_relay_failure(true)
            .idle_session_timeout(Duration::from_secs(30))
            .cleanup_interval(Duration::from_secs(5));

        assert_eq!(config.consumer_queue_capacity, 1);
        assert_eq!(
            config.init_segment_policy,
            InitSegmentPolicy::ResetOnProducerDisconnect
        );
        assert!(config.evict_on_relay_failure);
        assert_eq!(config.idle_session_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.cleanup_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "first-write-wins".parse::<InitSegmentPolicy>(),
            Ok(InitSegmentPolicy::FirstWriteWins)
        );
        assert_eq!(
            " Reset-On-Producer-Disconnect ".parse::<InitSegmentPolicy>(),
            Ok(InitSegmentPolicy::ResetOnProducerDisconnect)
        );
        assert!("sometimes".parse::<InitSegmentPolicy>().is_err());
    }
}
