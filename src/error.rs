//! Crate error types

use thiserror::Error;

use crate::server::config::ConfigError;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or file I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket read/write failure on one connection
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
