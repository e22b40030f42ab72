use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;
use crate::DEFAULT_LOG_TOPIC_PREFIX;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// Log writes per batch; a buffer reaching this size flushes eagerly
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Period of the background flush of partially filled buffers
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Reserved namespace of log topics
    #[serde(default = "default_topic_prefix")]
    pub default_topic_prefix: String,

    /// Directory of the node's own tracing output
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            default_topic_prefix: default_topic_prefix(),
            log_dir: default_log_dir(),
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "log.batch_size must be greater than 0".into(),
            )));
        }

        if self.default_topic_prefix.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "log.default_topic_prefix cannot be empty".into(),
            )));
        }

        Ok(())
    }
}

fn default_batch_size() -> usize {
    400
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_topic_prefix() -> String {
    DEFAULT_LOG_TOPIC_PREFIX.to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
