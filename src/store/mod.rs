//! Replicated key-value stores: master/clone frontends, their registry and
//! the replication protocol they speak.

mod backend;
mod handle;
mod protocol;
mod registry;
#[allow(clippy::module_inception)]
mod store;

pub use backend::*;
pub use handle::*;
pub use protocol::*;
pub use registry::*;
pub use store::*;


use crate::constants::STORE_CLONE_SUFFIX;
use crate::constants::STORE_MASTER_SUFFIX;
use crate::Topic;

/// Which side of a store a replication topic addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChannel {
    /// Commands from clones to the master.
    Master,
    /// Snapshots and updates from the master to clones.
    Clone,
}

pub fn master_topic(
    prefix: &str,
    name: &str,
) -> Topic {
    Topic::new(format!("{}{}/{}", prefix, name, STORE_MASTER_SUFFIX))
}

pub fn clone_topic(
    prefix: &str,
    name: &str,
) -> Topic {
    Topic::new(format!("{}{}/{}", prefix, name, STORE_CLONE_SUFFIX))
}

/// Splits `<prefix><name>/<master|clone>` into its store name and channel.
pub fn parse_store_topic<'a>(
    prefix: &str,
    topic: &'a Topic,
) -> Option<(&'a str, StoreChannel)> {
    let rest = topic.as_str().strip_prefix(prefix)?;
    let (name, suffix) = rest.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    match suffix {
        STORE_MASTER_SUFFIX => Some((name, StoreChannel::Master)),
        STORE_CLONE_SUFFIX => Some((name, StoreChannel::Clone)),
        _ => None,
    }
}
