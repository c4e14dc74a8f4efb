// File Path: src/config.rs

//! # Configuration
//!
//! Runtime settings read from environment variables, each with a default that
//! works for a single instance on a developer machine.

use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use crate::models::{ApiError, ApiResult};

/// Largest UDP datagram the bridge sends or accepts.
pub const MAX_DATAGRAM_SIZE: usize = 512;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/WebSocket server listens on.
    pub bind_addr: SocketAddr,
    /// Whether messages are bridged to other instances on the segment.
    pub bridge_enabled: bool,
    /// Local address the bridge receiver binds.
    pub bridge_bind: SocketAddr,
    /// Broadcast address the bridge sender writes to.
    pub bridge_target: SocketAddr,
    pub mailbox_capacity: usize,
    pub bridge_queue_capacity: usize,
    /// How long a producer waits on a full mailbox or bridge queue before dropping.
    pub enqueue_timeout: Duration,
    /// A connection that sends nothing for this long is closed.
    pub idle_timeout: Duration,
    /// Shared token required from connecting clients. `None` accepts any token.
    pub auth_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3100)),
            bridge_enabled: true,
            bridge_bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            bridge_target: SocketAddr::from(([255, 255, 255, 255], 3000)),
            mailbox_capacity: 50,
            bridge_queue_capacity: 1024,
            enqueue_timeout: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(60),
            auth_token: None,
        }
    }
}

impl Config {
    /// Builds the configuration from `CHAT_*` environment variables.
    pub fn from_env() -> ApiResult<Self> {
        let defaults = Self::default();

        let config = Self {
            bind_addr: parse_var("CHAT_BIND_ADDR", defaults.bind_addr)?,
            bridge_enabled: parse_var("CHAT_BRIDGE_ENABLED", defaults.bridge_enabled)?,
            bridge_bind: parse_var("CHAT_BRIDGE_BIND", defaults.bridge_bind)?,
            bridge_target: parse_var("CHAT_BRIDGE_TARGET", defaults.bridge_target)?,
            mailbox_capacity: parse_var("CHAT_MAILBOX_CAPACITY", defaults.mailbox_capacity)?,
            bridge_queue_capacity: parse_var(
                "CHAT_BRIDGE_QUEUE_CAPACITY",
                defaults.bridge_queue_capacity,
            )?,
            enqueue_timeout: Duration::from_millis(parse_var(
                "CHAT_ENQUEUE_TIMEOUT_MS",
                defaults.enqueue_timeout.as_millis() as u64,
            )?),
            idle_timeout: Duration::from_secs(parse_var(
                "CHAT_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )?),
            auth_token: env::var("CHAT_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> ApiResult<()> {
        if self.mailbox_capacity == 0 || self.bridge_queue_capacity == 0 {
            return Err(ApiError::Config("queue capacities must be greater than zero".into()));
        }
        // A zero idle timeout would close every connection on its first quiet poll.
        if self.idle_timeout.is_zero() {
            return Err(ApiError::Config("CHAT_IDLE_TIMEOUT_SECS must be greater than zero".into()));
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, default: T) -> ApiResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ApiError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(default),
    }
}
