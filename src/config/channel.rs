use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;
use crate::DEFAULT_CONNECT_RETRY_ENV;

/// A remote endpoint to peer with at startup
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PeerAddress {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelConfig {
    /// Address the node accepts peerings on. Empty: do not listen
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port to listen on, 0 picks a free one
    #[serde(default)]
    pub listen_port: u16,

    /// Peers to connect to at startup
    #[serde(default)]
    pub peers: Vec<PeerAddress>,

    /// Retry interval for peerings, overridable through
    /// `BROKER_DEFAULT_CONNECT_RETRY`
    #[serde(default = "default_connect_retry_secs")]
    pub connect_retry_secs: u64,

    /// Period of the poll loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound of inbound messages handled per tick
    #[serde(default = "default_max_messages_per_tick")]
    pub max_messages_per_tick: usize,

    /// Wall clock (true) or simulated time driven by `advance_time` (false)
    #[serde(default = "default_use_real_time")]
    pub use_real_time: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: 0,
            peers: vec![],
            connect_retry_secs: default_connect_retry_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_messages_per_tick: default_max_messages_per_tick(),
            use_real_time: default_use_real_time(),
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "poll_interval_ms must be at least 1ms".into(),
            )));
        }

        if self.max_messages_per_tick == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_messages_per_tick must be greater than 0".into(),
            )));
        }

        if let Some(peer) = self.peers.iter().find(|p| p.address.is_empty() || p.port == 0) {
            return Err(Error::Config(ConfigError::Message(format!(
                "invalid peer address {}:{}",
                peer.address, peer.port
            ))));
        }

        Ok(())
    }

    /// Retry interval for outbound peerings, with the environment override
    /// applied.
    pub fn connect_retry(&self) -> Duration {
        connect_retry_override().unwrap_or(Duration::from_secs(self.connect_retry_secs))
    }
}

/// Value of `BROKER_DEFAULT_CONNECT_RETRY` in seconds, if set and numeric.
pub fn connect_retry_override() -> Option<Duration> {
    let raw = std::env::var(DEFAULT_CONNECT_RETRY_ENV).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            tracing::warn!("ignoring non-numeric {}={}", DEFAULT_CONNECT_RETRY_ENV, raw);
            None
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}
fn default_connect_retry_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_max_messages_per_tick() -> usize {
    1000
}
fn default_use_real_time() -> bool {
    true
}
