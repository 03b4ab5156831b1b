//! Durable capture sinks
//!
//! Every frame a producer sends is appended to a sink keyed by session,
//! whether or not a consumer is attached. The relay treats the sink as a
//! pass-through: it opens a writer when a producer connects, appends each
//! frame, and closes the writer when the producer leaves.
//!
//! # Example
//! ```no_run
//! use audio_relay::registry::SessionId;
//! use audio_relay::sink::{CaptureSink, CaptureWriter, FileSink};
//!
//! # async fn example() -> std::io::Result<()> {
//! let sink = FileSink::new("./storage", "webm");
//! let mut writer = sink.open(&SessionId::new("abc")).await?;
//! writer.append(b"\x1a\x45\xdf\xa3").await?;
//! writer.close().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::io;

use crate::registry::SessionId;

pub mod file;
pub mod memory;

pub use file::{FileCapture, FileSink};
pub use memory::{MemoryCapture, MemorySink};

/// Factory for per-producer capture writers
pub trait CaptureSink: Send + Sync + 'static {
    /// Writer for one producer connection
    type Writer: CaptureWriter;

    /// Open (creating if needed) the append-only store for a session
    fn open(&self, session: &SessionId) -> impl Future<Output = io::Result<Self::Writer>> + Send;
}

/// Append-only writer held by one producer connection
pub trait CaptureWriter: Send + 'static {
    /// Durably append one frame
    fn append(&mut self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Flush and release the writer
    fn close(self) -> impl Future<Output = io::Result<()>> + Send
    where
        Self: Sized;
}
