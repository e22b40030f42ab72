//! Configuration management for a broker node.
//!
//! Provides hierarchical configuration loading from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. Optional `config/broker` file in the working directory
//! 3. Explicit config file passed to [`BrokerConfig::load`]
//! 4. Environment variables `BROKER__<SECTION>__<KEY>` (highest priority)

mod channel;
mod log;
mod monitoring;
mod store;
pub use channel::*;
pub use log::*;
pub use monitoring::*;
pub use store::*;


//---
use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BrokerConfig {
    /// Transport endpoint, peers and poll loop pacing
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Log batching and the node's own log output
    #[serde(default)]
    pub log: LogConfig,
    /// Store namespace, query timeouts and clone defaults
    #[serde(default)]
    pub store: StoreConfig,
    /// Metrics and monitoring settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl BrokerConfig {
    /// Merges every configuration source, then validates the result.
    ///
    /// # Arguments
    /// * `path` - Optional path to an explicit configuration file
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder().add_source(File::with_name("config/broker").required(false));

        if let Some(path) = path {
            config = config.add_source(File::with_name(path).required(true));
        }

        config = config.add_source(
            Environment::with_prefix("BROKER")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let cfg: BrokerConfig = config.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.channel.validate()?;
        self.log.validate()?;
        self.store.validate()?;
        self.monitoring.validate()?;
        Ok(())
    }
}
