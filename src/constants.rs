// -
// Wire envelope

/// Version tag carried as the first element of every message envelope.
pub const PROTOCOL_VERSION: u64 = 1;

// -
// Reserved topics

/// Namespace under which log streams are published, e.g. `bro/log/conn`.
pub const DEFAULT_LOG_TOPIC_PREFIX: &str = "bro/log/";

/// Namespace of store replication traffic, e.g. `bro/store/db/master`.
pub const DEFAULT_STORE_TOPIC_PREFIX: &str = "bro/store/";

pub(crate) const STORE_MASTER_SUFFIX: &str = "master";
pub(crate) const STORE_CLONE_SUFFIX: &str = "clone";

/// Local-only topics on which the channel surfaces peering notifications.
pub const STATUS_TOPIC: &str = "<$>/local/data/statuses";
pub const ERROR_TOPIC: &str = "<$>/local/data/errors";

// -
// Environment overrides

/// Overrides the retry interval handed to `Manager::peer`.
pub const DEFAULT_CONNECT_RETRY_ENV: &str = "BROKER_DEFAULT_CONNECT_RETRY";

/// Sled tree holding store entries.
pub(crate) const STORE_DATA_TREE: &str = "_store_data";
