use std::fmt;

/// Non-owning, generation-checked reference to a registered store.
///
/// A handle outlives nothing: once its store is closed the slot generation
/// moves on and every lookup through the old handle fails with
/// `BrokerError::InvalidHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl StoreHandle {
    pub(crate) fn new(
        index: u32,
        generation: u32,
    ) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for StoreHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "store#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Master,
    Clone,
}

impl StoreRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Master => "master",
            StoreRole::Clone => "clone",
        }
    }
}

/// Replication policy of a clone, all intervals in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloneParams {
    /// How often a disconnected clone asks its master for a snapshot.
    pub resync_interval: f64,
    /// Disconnected time after which reads fail as stale. Negative: never.
    pub stale_interval: f64,
    /// Disconnected time during which mutations are buffered for replay.
    /// Non-positive: mutations issued while disconnected are dropped.
    pub mutation_buffer_interval: f64,
}

impl Default for CloneParams {
    fn default() -> Self {
        Self {
            resync_interval: 10.0,
            stale_interval: 300.0,
            mutation_buffer_interval: 120.0,
        }
    }
}
