//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::registry::{InitSegmentPolicy, RegistryConfig};
use crate::server::origin::OriginPolicy;

/// Development-only fallback; override `JWT_SECRET` in production
pub const DEFAULT_JWT_SECRET: &str = "secret_key_change_this_later";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent relay connections (0 = unlimited)
    pub max_connections: usize,

    /// Secret for verifying consumer tokens
    pub jwt_secret: String,

    /// Directory for capture files
    pub storage_dir: PathBuf,

    /// Capture file extension
    pub capture_extension: String,

    /// Allowed `Origin` headers for upgrades
    pub origin_policy: OriginPolicy,

    /// Session registry options
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 0, // Unlimited
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            storage_dir: PathBuf::from("./storage"),
            capture_extension: "webm".to_string(),
            origin_policy: OriginPolicy::Any,
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Load configuration from the environment
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            let port: u16 = parse_var("PORT", &port)?;
            config.bind_addr.set_port(port);
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = parse_var("BIND_ADDR", &addr)?;
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            config.jwt_secret = secret;
        }
        if let Some(dir) = lookup("STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(ext) = lookup("CAPTURE_EXTENSION") {
            config.capture_extension = ext.trim_start_matches('.').to_string();
        }
        if let Some(origins) = lookup("ALLOWED_ORIGIN") {
            config.origin_policy = OriginPolicy::parse(&origins);
        }
        if let Some(max) = lookup("MAX_CONNECTIONS") {
            config.max_connections = parse_var("MAX_CONNECTIONS", &max)?;
        }

        let mut registry = RegistryConfig::default();
        if let Some(capacity) = lookup("CONSUMER_QUEUE_CAPACITY") {
            registry = registry.consumer_queue_capacity(parse_var("CONSUMER_QUEUE_CAPACITY", &capacity)?);
        }
        if let Some(policy) = lookup("INIT_SEGMENT_POLICY") {
            let policy: InitSegmentPolicy = policy.parse().map_err(|reason| ConfigError::Invalid {
                var: "INIT_SEGMENT_POLICY",
                value: policy.clone(),
                reason,
            })?;
            registry = registry.init_segment_policy(policy);
        }
        if let Some(evict) = lookup("EVICT_ON_RELAY_FAILURE") {
            registry = registry.evict_on_relay_failure(parse_bool("EVICT_ON_RELAY_FAILURE", &evict)?);
        }
        if let Some(secs) = lookup("IDLE_SESSION_TIMEOUT_SECS") {
            let secs: u64 = parse_var("IDLE_SESSION_TIMEOUT_SECS", &secs)?;
            registry = registry.idle_session_timeout(Duration::from_secs(secs));
        }
        config.registry = registry;

        Ok(config)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the origin policy
    pub fn origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = policy;
        self
    }

    /// Set the capture directory
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// Set the registry configuration
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
