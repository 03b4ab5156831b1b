//! Session routing keys
//!
//! This module defines the key types for identifying sessions and the
//! producers attached to them.

use std::fmt;
use std::sync::Arc;

/// Opaque identifier of a streaming session
///
/// The relay never validates that a session exists; the identifier is only a
/// routing key shared by the producer and consumer paths. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Create a session id from any string
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Parse a session id taken from a request path
    ///
    /// The id is kept verbatim. Returns `None` for empty ids, ids with
    /// leading or trailing whitespace, and ids containing a path separator.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.trim() != raw || raw.contains('/') {
            return None;
        }
        Some(Self::new(raw))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Identifier of one producer connection attached to a session
///
/// Handed out by [`SessionRegistry::attach_producer`](super::SessionRegistry::attach_producer);
/// a detach only takes effect if the id still matches the session's current producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProducerId(pub(super) u64);

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
