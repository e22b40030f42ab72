use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::CloneParams;
use crate::Error;
use crate::Result;
use crate::DEFAULT_STORE_TOPIC_PREFIX;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Namespace of store replication topics
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Deadline of tracked queries that were not given one
    #[serde(default = "default_query_timeout_secs")]
    pub default_query_timeout_secs: f64,

    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: f64,

    /// Negative: clones never go stale
    #[serde(default = "default_stale_interval_secs")]
    pub stale_interval_secs: f64,

    /// Non-positive: clones drop mutations while disconnected
    #[serde(default = "default_mutation_buffer_interval_secs")]
    pub mutation_buffer_interval_secs: f64,

    /// Parent directory of persistent master backends
    #[serde(default = "default_backend_root_dir")]
    pub backend_root_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            default_query_timeout_secs: default_query_timeout_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            stale_interval_secs: default_stale_interval_secs(),
            mutation_buffer_interval_secs: default_mutation_buffer_interval_secs(),
            backend_root_dir: default_backend_root_dir(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.topic_prefix.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "store.topic_prefix cannot be empty".into(),
            )));
        }

        if self.default_query_timeout_secs <= 0.0 {
            return Err(Error::Config(ConfigError::Message(
                "store.default_query_timeout_secs must be positive".into(),
            )));
        }

        if self.resync_interval_secs <= 0.0 {
            return Err(Error::Config(ConfigError::Message(
                "store.resync_interval_secs must be positive".into(),
            )));
        }

        Ok(())
    }

    /// Clone parameters used when a caller does not pass its own.
    pub fn default_clone_params(&self) -> CloneParams {
        CloneParams {
            resync_interval: self.resync_interval_secs,
            stale_interval: self.stale_interval_secs,
            mutation_buffer_interval: self.mutation_buffer_interval_secs,
        }
    }
}

fn default_topic_prefix() -> String {
    DEFAULT_STORE_TOPIC_PREFIX.to_string()
}
fn default_query_timeout_secs() -> f64 {
    10.0
}
fn default_resync_interval_secs() -> f64 {
    10.0
}
fn default_stale_interval_secs() -> f64 {
    300.0
}
fn default_mutation_buffer_interval_secs() -> f64 {
    120.0
}
fn default_backend_root_dir() -> PathBuf {
    PathBuf::from("./db")
}
