//! In-process message fabric.
//!
//! A [`MemoryHub`] connects any number of [`MemoryChannel`] endpoints living
//! in the same process. Peering, subscriptions and status notifications
//! follow the same rules as a networked fabric: messages reach direct peers
//! whose subscriptions match the topic, and peering changes surface as
//! status or error messages on the reserved local topics.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::MessageChannel;
use super::PeerInfo;
use super::PeerStatus;
use crate::BrokerError;
use crate::Data;
use crate::EndpointInfo;
use crate::ErrorCode;
use crate::ErrorStatus;
use crate::Message;
use crate::NetworkInfo;
use crate::Result;
use crate::Status;
use crate::StatusCode;
use crate::Topic;
use crate::ERROR_TOPIC;
use crate::STATUS_TOPIC;

const FIRST_EPHEMERAL_PORT: u16 = 40000;

type Frame = (Topic, Vec<u8>);

#[derive(Debug)]
struct EndpointState {
    tx: mpsc::UnboundedSender<Frame>,
    subscriptions: BTreeSet<String>,
    listening: Option<NetworkInfo>,
    peers: BTreeSet<String>,
}

impl EndpointState {
    fn accepts(
        &self,
        topic: &Topic,
    ) -> bool {
        self.subscriptions.iter().any(|prefix| topic.matches_prefix(prefix))
    }
}

#[derive(Debug)]
struct PendingPeering {
    from: String,
    target: NetworkInfo,
}

#[derive(Debug)]
struct HubState {
    endpoints: HashMap<String, EndpointState>,
    listeners: HashMap<NetworkInfo, String>,
    pending: Vec<PendingPeering>,
    next_port: u16,
}

impl HubState {
    fn endpoint_info(
        &self,
        node_id: &str,
    ) -> EndpointInfo {
        EndpointInfo {
            node_id: node_id.to_string(),
            network: self.endpoints.get(node_id).and_then(|e| e.listening.clone()),
        }
    }

    /// Hands an encoded message to `node_id`, bypassing its subscriptions.
    fn notify(
        &self,
        node_id: &str,
        topic: &str,
        msg: Message,
    ) {
        let Some(endpoint) = self.endpoints.get(node_id) else {
            return;
        };
        match bincode::serialize(&msg.to_data()) {
            Ok(bytes) => {
                let _ = endpoint.tx.send((Topic::from(topic), bytes));
            }
            Err(e) => warn!("failed to encode local notification: {}", e),
        }
    }

    fn status(
        &self,
        to: &str,
        code: StatusCode,
        about: &str,
        message: &str,
    ) {
        let status = Status {
            code,
            context: Some(self.endpoint_info(about)),
            message: message.to_string(),
        };
        self.notify(to, STATUS_TOPIC, Message::Status(status));
    }

    fn error(
        &self,
        to: &str,
        code: ErrorCode,
        context: Option<EndpointInfo>,
        message: &str,
    ) {
        let err = ErrorStatus {
            code,
            context,
            message: message.to_string(),
        };
        self.notify(to, ERROR_TOPIC, Message::Error(err));
    }

    fn connect(
        &mut self,
        a: &str,
        b: &str,
    ) {
        if a == b {
            return;
        }
        let newly = match self.endpoints.get_mut(a) {
            Some(ep) => ep.peers.insert(b.to_string()),
            None => return,
        };
        if let Some(ep) = self.endpoints.get_mut(b) {
            ep.peers.insert(a.to_string());
        }
        if newly {
            info!(a, b, "peering established");
            self.status(a, StatusCode::PeerAdded, b, "handshake successful");
            self.status(b, StatusCode::PeerAdded, a, "handshake successful");
        }
    }

    /// Tears down the peering between `a` and `b`. `a` sees `a_code`, `b`
    /// always sees the loss.
    fn disconnect(
        &mut self,
        a: &str,
        b: &str,
        a_code: StatusCode,
    ) -> bool {
        let removed = self.endpoints.get_mut(a).map(|ep| ep.peers.remove(b)).unwrap_or(false);
        if let Some(ep) = self.endpoints.get_mut(b) {
            ep.peers.remove(a);
        }
        if removed {
            info!(a, b, "peering closed");
            self.status(a, a_code, b, "peering closed");
            self.status(b, StatusCode::PeerLost, a, "lost connection to remote peer");
        }
        removed
    }
}

/// Shared in-process fabric. Cloning yields another handle to the same hub.
#[derive(Debug, Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                endpoints: HashMap::new(),
                listeners: HashMap::new(),
                pending: Vec::new(),
                next_port: FIRST_EPHEMERAL_PORT,
            })),
        }
    }

    /// Registers a new endpoint with a generated node id.
    pub fn endpoint(&self) -> MemoryChannel {
        let node_id = nanoid::nanoid!();
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().endpoints.insert(node_id.clone(), EndpointState {
            tx,
            subscriptions: BTreeSet::new(),
            listening: None,
            peers: BTreeSet::new(),
        });
        debug!(%node_id, "endpoint registered");
        MemoryChannel {
            node_id,
            hub: self.clone(),
            rx,
        }
    }

    /// Simulates a connection loss between two endpoints: both sides see
    /// `PeerLost`.
    pub fn disconnect(
        &self,
        a: &str,
        b: &str,
    ) -> bool {
        self.state.lock().disconnect(a, b, StatusCode::PeerLost)
    }

    /// Re-establishes a peering dropped by [`MemoryHub::disconnect`].
    pub fn reconnect(
        &self,
        a: &str,
        b: &str,
    ) {
        self.state.lock().connect(a, b)
    }
}

/// One endpoint of a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryChannel {
    node_id: String,
    hub: MemoryHub,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MessageChannel for MemoryChannel {
    fn node_id(&self) -> String {
        self.node_id.clone()
    }

    fn publish(
        &mut self,
        topic: &Topic,
        data: Data,
    ) -> Result<()> {
        let bytes = bincode::serialize(&data)?;
        let state = self.hub.state.lock();
        let me = state
            .endpoints
            .get(&self.node_id)
            .ok_or_else(|| BrokerError::Transport(format!("endpoint {} is not registered", self.node_id)))?;

        let mut delivered = 0;
        for peer in &me.peers {
            if let Some(ep) = state.endpoints.get(peer) {
                if ep.accepts(topic) && ep.tx.send((topic.clone(), bytes.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }
        trace!(node = %self.node_id, %topic, delivered, "published");
        Ok(())
    }

    fn try_receive(&mut self) -> Option<(Topic, Data)> {
        loop {
            let (topic, bytes) = self.rx.try_recv().ok()?;
            match bincode::deserialize::<Data>(&bytes) {
                Ok(data) => return Some((topic, data)),
                Err(e) => warn!(node = %self.node_id, %topic, "dropping undecodable frame: {}", e),
            }
        }
    }

    fn subscribe(
        &mut self,
        prefix: &str,
    ) -> Result<()> {
        let mut state = self.hub.state.lock();
        let ep = state
            .endpoints
            .get_mut(&self.node_id)
            .ok_or_else(|| BrokerError::Transport(format!("endpoint {} is not registered", self.node_id)))?;
        ep.subscriptions.insert(prefix.to_string());
        Ok(())
    }

    fn unsubscribe(
        &mut self,
        prefix: &str,
    ) -> Result<()> {
        let mut state = self.hub.state.lock();
        if let Some(ep) = state.endpoints.get_mut(&self.node_id) {
            ep.subscriptions.remove(prefix);
        }
        Ok(())
    }

    fn listen(
        &mut self,
        address: &str,
        port: u16,
    ) -> Result<u16> {
        let mut state = self.hub.state.lock();
        let port = if port == 0 {
            let p = state.next_port;
            state.next_port = state.next_port.wrapping_add(1);
            p
        } else {
            port
        };
        let net = NetworkInfo {
            address: address.to_string(),
            port,
        };

        match state.listeners.get(&net) {
            Some(owner) if *owner != self.node_id => {
                return Err(BrokerError::Transport(format!("{}:{} already in use", address, port)).into());
            }
            _ => {}
        }

        state.listeners.insert(net.clone(), self.node_id.clone());
        if let Some(ep) = state.endpoints.get_mut(&self.node_id) {
            ep.listening = Some(net.clone());
        }
        info!(node = %self.node_id, address, port, "listening");

        // Peerings that were waiting for this address complete now.
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|p| p.target == net);
        state.pending = waiting;
        for p in ready {
            state.connect(&p.from, &self.node_id);
        }

        Ok(port)
    }

    fn peer(
        &mut self,
        address: &str,
        port: u16,
        retry: Duration,
    ) -> Result<()> {
        let mut state = self.hub.state.lock();
        let target = NetworkInfo {
            address: address.to_string(),
            port,
        };

        match state.listeners.get(&target).cloned() {
            Some(remote) => {
                state.connect(&self.node_id, &remote);
            }
            None => {
                debug!(node = %self.node_id, address, port, ?retry, "peer unavailable, retrying when it listens");
                let context = Some(EndpointInfo {
                    node_id: String::new(),
                    network: Some(target.clone()),
                });
                state.error(&self.node_id, ErrorCode::PeerUnavailable, context, "unable to connect to remote peer");
                if !retry.is_zero() {
                    state.pending.push(PendingPeering {
                        from: self.node_id.clone(),
                        target,
                    });
                }
            }
        }
        Ok(())
    }

    fn unpeer(
        &mut self,
        address: &str,
        port: u16,
    ) -> Result<()> {
        let mut state = self.hub.state.lock();
        let target = NetworkInfo {
            address: address.to_string(),
            port,
        };
        state.pending.retain(|p| !(p.from == self.node_id && p.target == target));

        let Some(remote) = state.listeners.get(&target).cloned() else {
            return Err(BrokerError::Transport(format!("no peer at {}:{}", address, port)).into());
        };
        if !state.disconnect(&self.node_id, &remote, StatusCode::PeerRemoved) {
            return Err(BrokerError::Transport(format!("not peered with {}:{}", address, port)).into());
        }
        Ok(())
    }

    fn peers(&self) -> Vec<PeerInfo> {
        let state = self.hub.state.lock();
        state
            .endpoints
            .get(&self.node_id)
            .map(|ep| {
                ep.peers
                    .iter()
                    .map(|peer| PeerInfo {
                        peer: state.endpoint_info(peer),
                        status: PeerStatus::Peered,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let mut state = self.hub.state.lock();
        let peers: Vec<String> = state
            .endpoints
            .get(&self.node_id)
            .map(|ep| ep.peers.iter().cloned().collect())
            .unwrap_or_default();
        for peer in peers {
            state.disconnect(&self.node_id, &peer, StatusCode::PeerRemoved);
        }
        let node_id = self.node_id.clone();
        state.listeners.retain(|_, owner| *owner != node_id);
        state.pending.retain(|p| p.from != node_id);
        state.endpoints.remove(&self.node_id);
        debug!(%node_id, "endpoint closed");
    }
}
