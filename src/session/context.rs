//! Connection context
//!
//! Context carried by each connection task, used for routing and for the
//! fields attached to its log lines.

use std::fmt;
use std::net::SocketAddr;

use crate::auth::Identity;
use crate::registry::SessionId;

/// Which side of a session a connection is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends audio
    Producer,
    /// Receives relayed audio
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Producer => f.write_str("producer"),
            Role::Consumer => f.write_str("consumer"),
        }
    }
}

/// Context for one accepted connection
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Unique connection ID
    pub connection_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Session the connection is bound to
    pub session_id: SessionId,

    /// Producer or consumer
    pub role: Role,

    /// Verified identity (consumers only)
    pub identity: Option<Identity>,
}

impl ConnectionContext {
    /// Create a new context
    pub fn new(connection_id: u64, peer_addr: SocketAddr, session_id: SessionId, role: Role) -> Self {
        Self {
            connection_id,
            peer_addr,
            session_id,
            role,
            identity: None,
        }
    }

    /// Attach the verified identity
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// User id of the verified identity, if any
    pub fn user_id(&self) -> Option<i64> {
        self.identity.as_ref().map(|i| i.user_id)
    }
}
