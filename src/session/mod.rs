//! Per-connection session state
//!
//! Each producer or consumer connection carries a [`ConnectionContext`] and a
//! small state machine tracking its lifecycle.

pub mod context;
pub mod state;

pub use context::{ConnectionContext, Role};
pub use state::{ConsumerPhase, ConsumerState, ProducerPhase, ProducerState};
