//! Live audio relay
//!
//! A producer streams binary audio frames over a WebSocket. Every frame is
//! appended to a durable capture keyed by session, and forwarded in real
//! time to the session's single authenticated consumer. A late joining
//! consumer first receives the session's cached init segment (the first
//! frame a producer sent) so its decoder can start mid-stream.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use audio_relay::auth::JwtAuthenticator;
//! use audio_relay::sink::FileSink;
//! use audio_relay::{RelayServer, ServerConfig};
//!
//! # async fn run() -> audio_relay::Result<()> {
//! let config = ServerConfig::from_env()?;
//! let sink = FileSink::new(&config.storage_dir, &config.capture_extension);
//! let auth = Arc::new(JwtAuthenticator::hs256(config.jwt_secret.as_bytes()));
//!
//! RelayServer::new(config, sink, auth).run().await
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod sink;
pub mod stats;

pub use error::{Error, Result};
pub use registry::{SessionId, SessionRegistry};
pub use server::{RelayServer, ServerConfig};
