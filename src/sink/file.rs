//! File-backed capture sink
//!
//! Appends each session's frames to `<dir>/<session>.<extension>`. Files are
//! opened in append mode, so a producer that reconnects continues the same
//! file.

use std::io;
use std::path::{Path, PathBuf};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::{CaptureSink, CaptureWriter};
use crate::registry::SessionId;

/// Characters kept verbatim in capture file names; `%` is always escaped
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-').remove(b'=');

/// Sink writing one append-only file per session
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
    extension: String,
}

impl FileSink {
    /// Create a sink rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    /// Storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the capture file for a session
    ///
    /// Anything outside `[A-Za-z0-9_=-]` is percent-encoded, so two distinct
    /// session ids never map to the same file.
    pub fn path_for(&self, session: &SessionId) -> PathBuf {
        let safe_name = utf8_percent_encode(session.as_str(), FILE_NAME);
        self.dir.join(format!("{}.{}", safe_name, self.extension))
    }
}

impl CaptureSink for FileSink {
    type Writer = FileCapture;

    async fn open(&self, session: &SessionId) -> io::Result<FileCapture> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(session);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        tracing::debug!(session = %session, path = %path.display(), "Capture file opened");

        Ok(FileCapture { file, path })
    }
}

/// Open capture file for one producer connection
#[derive(Debug)]
pub struct FileCapture {
    file: File,
    path: PathBuf,
}

impl CaptureWriter for FileCapture {
    async fn append(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame).await?;
        self.file.flush().await
    }

    async fn close(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        tracing::debug!(path = %self.path.display(), "Capture file closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_escapes_session_id() {
        let sink = FileSink::new("/tmp/capture", "webm");

        assert_eq!(
            sink.path_for(&SessionId::new("aB3-_x==")),
            PathBuf::from("/tmp/capture/aB3-_x==.webm")
        );
        assert_eq!(
            sink.path_for(&SessionId::new("../etc")),
            PathBuf::from("/tmp/capture/%2E%2E%2Fetc.webm")
        );
        assert_eq!(
            sink.path_for(&SessionId::new("50%")),
            PathBuf::from("/tmp/capture/50%25.webm")
        );
    }

    #[test]
    fn test_distinct_ids_get_distinct_paths() {
        let sink = FileSink::new("/tmp/capture", "webm");
        let ids = ["rec.1", "rec_1", "rec%2E1", "rec 1", "rec/1", "réc1"];

        let paths: std::collections::HashSet<_> = ids
            .iter()
            .map(|id| sink.path_for(&SessionId::new(id)))
            .collect();
        assert_eq!(paths.len(), ids.len());
    }

    #[tokio::test]
    async fn test_similar_ids_do_not_share_a_capture() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path(), "webm");
        let dotted = SessionId::new("rec.1");
        let underscored = SessionId::new("rec_1");

        let mut a = sink.open(&dotted).await.unwrap();
        let mut b = sink.open(&underscored).await.unwrap();
        a.append(b"AAAA").await.unwrap();
        b.append(b"BBBB").await.unwrap();
        a.close().await.unwrap();
        b.close().await.unwrap();

        assert_eq!(tokio::fs::read(sink.path_for(&dotted)).await.unwrap(), b"AAAA");
        assert_eq!(
            tokio::fs::read(sink.path_for(&underscored)).await.unwrap(),
            b"BBBB"
        );
    }

    #[tokio::test]
    async fn test_appends_in_order_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("storage"), "webm");
        let session = SessionId::new("s1");

        let mut writer = sink.open(&session).await.unwrap();
        writer.append(b"H").await.unwrap();
        writer.append(b"F1").await.unwrap();
        writer.close().await.unwrap();

        // A reconnecting producer keeps appending
        let mut writer = sink.open(&session).await.unwrap();
        writer.append(b"F2").await.unwrap();
        writer.close().await.unwrap();

        let contents = tokio::fs::read(sink.path_for(&session)).await.unwrap();
        assert_eq!(contents, b"HF1F2");
    }

    #[tokio::test]
    async fn test_open_fails_when_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        let sink = FileSink::new(&blocker, "webm");
        assert!(sink.open(&SessionId::new("s1")).await.is_err());
    }
}
