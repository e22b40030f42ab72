//! Typed message channel: the pub/sub transport the manager drives.
//!
//! The manager never blocks on the channel: it publishes fire-and-forget and
//! drains inbound traffic with [`MessageChannel::try_receive`] once per tick.

mod memory;

pub use memory::*;


use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::Data;
use crate::EndpointInfo;
use crate::Result;
use crate::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Initialized,
    Connecting,
    Connected,
    Peered,
    Disconnected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer: EndpointInfo,
    pub status: PeerStatus,
}

#[cfg_attr(test, automock)]
pub trait MessageChannel: Send + 'static {
    /// Identifier of the local endpoint, unique across the fabric.
    fn node_id(&self) -> String;

    fn publish(
        &mut self,
        topic: &Topic,
        data: Data,
    ) -> Result<()>;

    /// Next inbound message, if any. Never blocks.
    fn try_receive(&mut self) -> Option<(Topic, Data)>;

    fn subscribe(
        &mut self,
        prefix: &str,
    ) -> Result<()>;

    fn unsubscribe(
        &mut self,
        prefix: &str,
    ) -> Result<()>;

    /// Accepts peerings on `address:port`; port 0 picks one. Returns the
    /// bound port.
    fn listen(
        &mut self,
        address: &str,
        port: u16,
    ) -> Result<u16>;

    /// Initiates a peering; the outcome arrives later as a status or error
    /// message.
    fn peer(
        &mut self,
        address: &str,
        port: u16,
        retry: Duration,
    ) -> Result<()>;

    fn unpeer(
        &mut self,
        address: &str,
        port: u16,
    ) -> Result<()>;

    fn peers(&self) -> Vec<PeerInfo>;
}
