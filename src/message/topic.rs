use std::fmt;

use serde::Deserialize;
use serde::Serialize;

pub const TOPIC_SEPARATOR: char = '/';

/// Hierarchical routing key.
///
/// Subscriptions are plain prefix filters: `a/b` is matched by the
/// subscriptions `a`, `a/` and `a/b`, but not by `c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Topic(topic.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches_prefix(
        &self,
        prefix: &str,
    ) -> bool {
        self.0.starts_with(prefix)
    }

    /// Appends `suffix` as a new path segment.
    pub fn join(
        &self,
        suffix: &str,
    ) -> Topic {
        if self.0.is_empty() || self.0.ends_with(TOPIC_SEPARATOR) {
            Topic(format!("{}{}", self.0, suffix))
        } else {
            Topic(format!("{}{}{}", self.0, TOPIC_SEPARATOR, suffix))
        }
    }

    /// Path segments, empty segments skipped.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(TOPIC_SEPARATOR).filter(|s| !s.is_empty())
    }
}

impl fmt::Display for Topic {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Topic(s.to_string())
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Topic(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Maps a log stream and writer onto the topic its records are published to.
pub type LogTopicFn = Box<dyn Fn(&str, &str) -> Topic + Send + Sync>;

/// Default naming: `<prefix><stream>`, independent of the writer.
pub fn default_log_topic(prefix: &str) -> LogTopicFn {
    let prefix = prefix.to_string();
    Box::new(move |stream: &str, _writer: &str| Topic(format!("{prefix}{stream}")))
}
