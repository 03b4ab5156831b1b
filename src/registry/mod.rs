//! Session registry for producer-to-consumer routing
//!
//! The registry maps each session to at most one live consumer and the
//! session's cached init segment. Producers look the consumer up per frame;
//! consumers register on connect and unregister on disconnect.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<SessionRegistry>
//!                     ┌──────────────────────────┐
//!                     │ sessions: DashMap<Id,    │
//!                     │   SessionEntry {         │
//!                     │     consumer,            │
//!                     │     init_segment,        │
//!                     │   }                      │
//!                     │ >                        │
//!                     └────────────┬─────────────┘
//!                                  │
//!              ┌───────────────────┴───────────────────┐
//!              │                                       │
//!              ▼                                       ▼
//!         [Producer]                              [Consumer]
//!    set_init_segment_if_absent()             register_consumer()
//!    get_consumer() ──► handle.forward() ──► receiver.recv() ──► socket
//! ```
//!
//! # Frame Buffers
//!
//! Frames are `bytes::Bytes`. Inside the relay, the cached init segment, the
//! sink append and the consumer queue all share the producer's allocation,
//! and since `Bytes` is immutable a cached segment never changes after it is
//! stored. Each frame is copied once on egress, into the `Vec<u8>` that an
//! axum WebSocket message owns.

pub mod config;
pub mod entry;
pub mod error;
pub mod frame;
pub mod handle;
pub mod store;

pub use config::{InitSegmentPolicy, RegistryConfig};
pub use entry::{SessionEntry, SessionStats};
pub use error::RelayError;
pub use frame::{ProducerId, SessionId};
pub use handle::{ConsumerHandle, ConsumerReceiver};
pub use store::SessionRegistry;
