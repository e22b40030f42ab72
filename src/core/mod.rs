//! Broker manager: dispatch, log batching, query tracking and the poll loop
//! that ties the stores, the channel and the host together.

mod context;
mod dispatcher;
mod log_buffer;
mod manager;
mod query_tracker;
mod stats;

pub use context::*;
pub use log_buffer::*;
pub use manager::*;
pub use query_tracker::*;
pub use stats::*;

#[cfg(test)]
mod manager_test;
