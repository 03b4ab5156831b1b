//! Session entry and state types
//!
//! This module defines the per-session state stored in the registry.

use std::time::{Duration, Instant};

use bytes::Bytes;

use super::frame::ProducerId;
use super::handle::ConsumerHandle;

/// Entry for a single session in the registry
#[derive(Debug)]
pub struct SessionEntry {
    /// Currently registered consumer (at most one)
    pub(super) consumer: Option<ConsumerHandle>,

    /// Cached initialization segment for late joiners
    pub(super) init_segment: Option<Bytes>,

    /// Producer currently streaming into this session
    pub(super) producer: Option<ProducerId>,

    /// When the entry was created
    pub(super) created_at: Instant,

    /// When the last participant left (None while anyone is attached)
    pub(super) vacated_at: Option<Instant>,
}

impl SessionEntry {
    pub(super) fn new() -> Self {
        Self {
            consumer: None,
            init_segment: None,
            producer: None,
            created_at: Instant::now(),
            vacated_at: None,
        }
    }

    /// Whether neither a consumer nor a producer is attached
    pub fn is_vacant(&self) -> bool {
        self.consumer.is_none() && self.producer.is_none()
    }

    /// Record the vacancy time if the last participant just left
    pub(super) fn mark_vacated_if_empty(&mut self) {
        if self.is_vacant() && self.vacated_at.is_none() {
            self.vacated_at = Some(Instant::now());
        }
    }

    /// Whether the idle sweep may drop this entry
    pub(super) fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        if !self.is_vacant() {
            return false;
        }

        let since = self.vacated_at.unwrap_or(self.created_at);
        now.duration_since(since) > timeout
    }

    pub(super) fn stats(&self) -> SessionStats {
        SessionStats {
            has_consumer: self.consumer.is_some(),
            has_producer: self.producer.is_some(),
            init_segment_len: self.init_segment.as_ref().map(Bytes::len),
            age: self.created_at.elapsed(),
        }
    }
}

/// Snapshot of one session's registry state
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Whether a consumer is registered
    pub has_consumer: bool,
    /// Whether a producer is attached
    pub has_producer: bool,
    /// Length of the cached init segment, if any
    pub init_segment_len: Option<usize>,
    /// Time since the entry was created
    pub age: Duration,
}
