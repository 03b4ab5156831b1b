//! In-memory capture sink
//!
//! Keeps every appended frame per session. Useful for tests and for running
//! the relay without persistence.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::{CaptureSink, CaptureWriter};
use crate::registry::SessionId;

type FrameLog = Arc<Mutex<HashMap<SessionId, Vec<Bytes>>>>;

/// Sink recording frames in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: FrameLog,
    fail_appends: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames appended for a session, in order
    pub fn frames(&self, session: &SessionId) -> Vec<Bytes> {
        self.frames
            .lock()
            .map(|log| log.get(session).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Make subsequent appends fail (frames are not recorded while set)
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Relaxed);
    }
}

impl CaptureSink for MemorySink {
    type Writer = MemoryCapture;

    async fn open(&self, session: &SessionId) -> io::Result<MemoryCapture> {
        Ok(MemoryCapture {
            session: session.clone(),
            frames: Arc::clone(&self.frames),
            fail_appends: Arc::clone(&self.fail_appends),
        })
    }
}

/// Writer handed out by [`MemorySink`]
#[derive(Debug)]
pub struct MemoryCapture {
    session: SessionId,
    frames: FrameLog,
    fail_appends: Arc<AtomicBool>,
}

impl CaptureWriter for MemoryCapture {
    async fn append(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.fail_appends.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Other, "append rejected"));
        }

        let mut log = self
            .frames
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "frame log poisoned"))?;
        log.entry(self.session.clone())
            .or_default()
            .push(Bytes::copy_from_slice(frame));
        Ok(())
    }

    async fn close(self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_frames_per_session() {
        let sink = MemorySink::new();
        let a = SessionId::new("a");
        let b = SessionId::new("b");

        let mut wa = sink.open(&a).await.unwrap();
        let mut wb = sink.open(&b).await.unwrap();
        wa.append(b"H").await.unwrap();
        wb.append(b"X").await.unwrap();
        wa.append(b"F1").await.unwrap();

        assert_eq!(sink.frames(&a), vec![Bytes::from_static(b"H"), Bytes::from_static(b"F1")]);
        assert_eq!(sink.frames(&b), vec![Bytes::from_static(b"X")]);
        assert!(sink.frames(&SessionId::new("c")).is_empty());
    }

    #[tokio::test]
    async fn test_failing_appends() {
        let sink = MemorySink::new();
        let session = SessionId::new("a");
        let mut writer = sink.open(&session).await.unwrap();

        sink.fail_appends(true);
        assert!(writer.append(b"lost").await.is_err());
        sink.fail_appends(false);
        writer.append(b"kept").await.unwrap();

        assert_eq!(sink.frames(&session), vec![Bytes::from_static(b"kept")]);
    }
}
