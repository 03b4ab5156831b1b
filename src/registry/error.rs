//! Relay error types
//!
//! Errors returned when forwarding a frame to a registered consumer.

use thiserror::Error;

/// Error type for relay forward attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The consumer was closed (evicted, unregistered, or its task exited)
    #[error("consumer is closed")]
    ConsumerClosed,
    /// The consumer's outbound queue is full; the frame was dropped
    #[error("consumer outbound queue is full")]
    ConsumerLagging,
}
