//! Connection state machines
//!
//! Tracks the lifecycle of producer and consumer connections from accept to
//! close.

use std::time::{Duration, Instant};

/// Producer connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerPhase {
    /// Connected, no binary frame seen yet
    AwaitingFirstFrame,
    /// First frame processed, relaying
    Streaming,
    /// Connection finished
    Closed,
}

/// Consumer connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerPhase {
    /// Upgraded, not yet registered
    Connecting,
    /// Registered and receiving relayed frames
    Registered,
    /// Connection finished
    Closed,
}

/// Producer connection state
#[derive(Debug)]
pub struct ProducerState {
    /// Current phase
    pub phase: ProducerPhase,

    /// Connection start time
    pub connected_at: Instant,
}

impl ProducerState {
    /// Create a new producer state
    pub fn new() -> Self {
        Self {
            phase: ProducerPhase::AwaitingFirstFrame,
            connected_at: Instant::now(),
        }
    }

    /// Record a binary frame
    ///
    /// Returns `true` for the frame that moves the connection out of
    /// `AwaitingFirstFrame`; that frame is the init segment candidate.
    pub fn on_binary_frame(&mut self) -> bool {
        if self.phase == ProducerPhase::AwaitingFirstFrame {
            self.phase = ProducerPhase::Streaming;
            return true;
        }
        false
    }

    /// Close the connection
    pub fn close(&mut self) {
        self.phase = ProducerPhase::Closed;
    }

    /// Time since the connection was accepted
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Default for ProducerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer connection state
#[derive(Debug)]
pub struct ConsumerState {
    /// Current phase
    pub phase: ConsumerPhase,
}

impl ConsumerState {
    /// Create a new consumer state
    pub fn new() -> Self {
        Self {
            phase: ConsumerPhase::Connecting,
        }
    }

    /// Mark registration complete
    pub fn register(&mut self) {
        if self.phase == ConsumerPhase::Connecting {
            self.phase = ConsumerPhase::Registered;
        }
    }

    /// Close the connection
    pub fn close(&mut self) {
        self.phase = ConsumerPhase::Closed;
    }
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self::new()
    }
}
