//! Relay server
//!
//! Provides the WebSocket surface of the relay:
//! - Producer ingest on `/ws/kid/{session}`
//! - Authenticated consumer playback on `/ws/parent/{session}`

pub mod config;
pub mod egress;
pub mod ingress;
pub mod listener;
pub mod origin;

pub use config::{ConfigError, ServerConfig};
pub use egress::{run_consumer, ConsumerExit};
pub use ingress::run_producer;
pub use listener::RelayServer;
pub use origin::OriginPolicy;
