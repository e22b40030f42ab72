//! Message dispatch and replicated key-value stores on top of a
//! publish/subscribe fabric.
//!
//! A [`Manager`] owns the node's side of the fabric: it classifies inbound
//! messages for the host runtime, batches outbound log writes, runs master
//! and clone stores with their resynchronization and staleness policies,
//! tracks pending store queries and mirrors stores into external tables.

mod channel;
mod config;
mod constants;
mod core;
mod errors;
mod forwarding;
mod host;
mod message;
mod metrics;
mod store;
mod type_config;
pub mod utils;

pub use core::*;

pub use channel::*;
pub use config::*;
pub use constants::*;
pub use errors::*;
pub use forwarding::*;
pub use host::*;
pub use message::*;
pub use metrics::*;
pub use store::*;
pub use type_config::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
