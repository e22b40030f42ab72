//! Store frontend: one named key-value store in master or clone role.
//!
//! Operations never publish directly. They return [`StoreEffects`], which
//! the manager turns into channel sends and forwarding projections, so the
//! store stays a plain state machine driven by the engine clock.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::*;
use crate::Data;
use crate::Result;
use crate::Topic;

/// Outbound traffic and committed changes produced by one store operation.
#[derive(Debug, Default, PartialEq)]
pub struct StoreEffects {
    pub outbound: Vec<(Topic, StoreMessage)>,
    /// Changes applied to the local contents, in commit order.
    pub committed: Vec<Mutation>,
}

impl StoreEffects {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.committed.is_empty()
    }

    pub(crate) fn merge(
        &mut self,
        other: StoreEffects,
    ) {
        self.outbound.extend(other.outbound);
        self.committed.extend(other.committed);
    }
}

#[derive(Debug)]
struct MasterState {
    /// Identifies this incarnation of the master.
    epoch: String,
    /// Sequence number of the last committed mutation.
    seq: u64,
    /// Absolute expiry deadline per key.
    expiries: BTreeMap<Data, f64>,
}

impl MasterState {
    fn new() -> Self {
        Self {
            epoch: nanoid::nanoid!(),
            seq: 0,
            expiries: BTreeMap::new(),
        }
    }

    /// Numbers `mutation` and addresses the resulting update to the clones.
    fn commit(
        &mut self,
        store: &str,
        clone_topic: &Topic,
        mutation: Mutation,
    ) -> StoreEffects {
        self.seq += 1;
        trace!(store, seq = self.seq, ?mutation, "commit");
        StoreEffects {
            outbound: vec![(clone_topic.clone(), StoreMessage::Update {
                epoch: self.epoch.clone(),
                seq: self.seq,
                mutation: mutation.clone(),
            })],
            committed: vec![mutation],
        }
    }
}

#[derive(Debug)]
struct CloneState {
    params: CloneParams,
    master_node: Option<String>,
    /// Epoch of the master incarnation the replica follows.
    epoch: Option<String>,
    connected: bool,
    /// An Attach went out because the update stream broke off.
    resync_requested: bool,
    /// Set once the first snapshot arrived.
    synced: bool,
    disconnected_since: f64,
    last_attach: Option<f64>,
    stale_reported: bool,
    last_seq: u64,
    buffered: VecDeque<StoreMessage>,
    deferred: Vec<(u64, StoreQuery)>,
}

impl CloneState {
    fn new(
        params: CloneParams,
        now: f64,
    ) -> Self {
        Self {
            params,
            master_node: None,
            epoch: None,
            connected: false,
            resync_requested: false,
            synced: false,
            disconnected_since: now,
            last_attach: None,
            stale_reported: false,
            last_seq: 0,
            buffered: VecDeque::new(),
            deferred: Vec::new(),
        }
    }

    fn is_stale(
        &self,
        now: f64,
    ) -> bool {
        !self.connected
            && self.params.stale_interval >= 0.0
            && now - self.disconnected_since >= self.params.stale_interval
    }

    fn buffering_allowed(
        &self,
        now: f64,
    ) -> bool {
        self.params.mutation_buffer_interval > 0.0
            && now - self.disconnected_since < self.params.mutation_buffer_interval
    }

    fn attach_due(
        &self,
        now: f64,
    ) -> bool {
        match self.last_attach {
            None => true,
            Some(at) => now - at >= self.params.resync_interval,
        }
    }
}

#[derive(Debug)]
enum RoleState {
    Master(MasterState),
    Clone(CloneState),
}

pub struct DataStore {
    name: String,
    node_id: String,
    master_topic: Topic,
    clone_topic: Topic,
    backend: Box<dyn StoreBackend>,
    role: RoleState,
    /// Responses waiting to be handed to the query tracker on the next tick.
    responses: VecDeque<StoreResponse>,
}

impl std::fmt::Debug for DataStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("name", &self.name)
            .field("role", &self.role())
            .field("pending_responses", &self.responses.len())
            .finish()
    }
}

impl DataStore {
    pub fn new_master(
        name: &str,
        node_id: &str,
        topic_prefix: &str,
        backend: Box<dyn StoreBackend>,
    ) -> Self {
        Self::new(name, node_id, topic_prefix, backend, RoleState::Master(MasterState::new()))
    }

    pub fn new_clone(
        name: &str,
        node_id: &str,
        topic_prefix: &str,
        params: CloneParams,
        now: f64,
    ) -> Self {
        Self::new(
            name,
            node_id,
            topic_prefix,
            Box::new(MemoryBackend::default()),
            RoleState::Clone(CloneState::new(params, now)),
        )
    }

    fn new(
        name: &str,
        node_id: &str,
        topic_prefix: &str,
        backend: Box<dyn StoreBackend>,
        role: RoleState,
    ) -> Self {
        Self {
            name: name.to_string(),
            node_id: node_id.to_string(),
            master_topic: master_topic(topic_prefix, name),
            clone_topic: clone_topic(topic_prefix, name),
            backend,
            role,
            responses: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> StoreRole {
        match self.role {
            RoleState::Master(_) => StoreRole::Master,
            RoleState::Clone(_) => StoreRole::Clone,
        }
    }

    pub fn clone_params(&self) -> Option<CloneParams> {
        match &self.role {
            RoleState::Clone(c) => Some(c.params),
            RoleState::Master(_) => None,
        }
    }

    /// Topic this store listens on for replication traffic.
    pub fn inbound_topic(&self) -> &Topic {
        match self.role {
            RoleState::Master(_) => &self.master_topic,
            RoleState::Clone(_) => &self.clone_topic,
        }
    }

    pub fn is_connected(&self) -> bool {
        match &self.role {
            RoleState::Master(_) => true,
            RoleState::Clone(c) => c.connected,
        }
    }

    pub fn is_stale(
        &self,
        now: f64,
    ) -> bool {
        match &self.role {
            RoleState::Master(_) => false,
            RoleState::Clone(c) => c.is_stale(now),
        }
    }

    /// Master incarnation this store speaks for (master) or follows (clone).
    pub fn epoch(&self) -> Option<&str> {
        match &self.role {
            RoleState::Master(m) => Some(&m.epoch),
            RoleState::Clone(c) => c.epoch.as_deref(),
        }
    }

    pub fn buffered_mutations(&self) -> usize {
        match &self.role {
            RoleState::Clone(c) => c.buffered.len(),
            RoleState::Master(_) => 0,
        }
    }

    pub fn snapshot(&self) -> Result<Vec<(Data, Data)>> {
        self.backend.snapshot()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.backend.is_empty()
    }

    // -
    // Mutations

    pub fn put(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<f64>,
        now: f64,
    ) -> Result<StoreEffects> {
        match self.role {
            RoleState::Master(_) => self.commit_put(key, value, expiry, now),
            RoleState::Clone(_) => {
                let cmd = StoreMessage::Put {
                    key,
                    value,
                    expiry,
                    publisher: self.node_id.clone(),
                };
                Ok(self.clone_command(cmd, now))
            }
        }
    }

    pub fn erase(
        &mut self,
        key: Data,
        now: f64,
    ) -> Result<StoreEffects> {
        match self.role {
            RoleState::Master(_) => self.commit_erase(key),
            RoleState::Clone(_) => {
                let cmd = StoreMessage::Erase {
                    key,
                    publisher: self.node_id.clone(),
                };
                Ok(self.clone_command(cmd, now))
            }
        }
    }

    pub fn clear(
        &mut self,
        now: f64,
    ) -> Result<StoreEffects> {
        match self.role {
            RoleState::Master(_) => self.commit_clear(),
            RoleState::Clone(_) => {
                let cmd = StoreMessage::Clear {
                    publisher: self.node_id.clone(),
                };
                Ok(self.clone_command(cmd, now))
            }
        }
    }

    fn commit_put(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<f64>,
        now: f64,
    ) -> Result<StoreEffects> {
        let RoleState::Master(m) = &mut self.role else {
            return Ok(StoreEffects::default());
        };
        let prev = self.backend.put(key.clone(), value.clone())?;
        match expiry {
            Some(secs) => {
                m.expiries.insert(key.clone(), now + secs);
            }
            None => {
                m.expiries.remove(&key);
            }
        }
        let mutation = match prev {
            None => Mutation::Insert { key, value },
            Some(_) => Mutation::Update { key, value },
        };
        Ok(m.commit(&self.name, &self.clone_topic, mutation))
    }

    fn commit_erase(
        &mut self,
        key: Data,
    ) -> Result<StoreEffects> {
        let RoleState::Master(m) = &mut self.role else {
            return Ok(StoreEffects::default());
        };
        m.expiries.remove(&key);
        match self.backend.erase(&key)? {
            Some(_) => Ok(m.commit(&self.name, &self.clone_topic, Mutation::Erase { key })),
            None => {
                trace!(store = %self.name, %key, "erase of absent key");
                Ok(StoreEffects::default())
            }
        }
    }

    fn commit_clear(&mut self) -> Result<StoreEffects> {
        let RoleState::Master(m) = &mut self.role else {
            return Ok(StoreEffects::default());
        };
        self.backend.clear()?;
        m.expiries.clear();
        Ok(m.commit(&self.name, &self.clone_topic, Mutation::Clear))
    }

    /// Routes a locally issued mutation of a clone towards its master.
    fn clone_command(
        &mut self,
        cmd: StoreMessage,
        now: f64,
    ) -> StoreEffects {
        let RoleState::Clone(c) = &mut self.role else {
            return StoreEffects::default();
        };

        if c.connected {
            return StoreEffects {
                outbound: vec![(self.master_topic.clone(), cmd)],
                committed: vec![],
            };
        }

        if c.buffering_allowed(now) {
            debug!(store = %self.name, buffered = c.buffered.len() + 1, "buffering mutation while disconnected");
            c.buffered.push_back(cmd);
        } else {
            warn!(store = %self.name, "clone disconnected from master, dropping mutation");
        }
        StoreEffects::default()
    }

    // -
    // Queries

    /// Answers `query` into the response mailbox, or defers it until the
    /// clone has received its first snapshot.
    pub fn query(
        &mut self,
        request_id: u64,
        query: StoreQuery,
        now: f64,
    ) {
        if let RoleState::Clone(c) = &mut self.role {
            if c.is_stale(now) {
                debug!(store = %self.name, request_id, "query against stale clone");
                self.responses.push_back(StoreResponse {
                    request_id,
                    outcome: QueryOutcome::Failure(StoreFailure::Stale),
                });
                return;
            }
            if !c.synced {
                debug!(store = %self.name, request_id, "deferring query until first snapshot");
                c.deferred.push((request_id, query));
                return;
            }
        }

        let outcome = self.answer(&query);
        self.responses.push_back(StoreResponse { request_id, outcome });
    }

    fn answer(
        &self,
        query: &StoreQuery,
    ) -> QueryOutcome {
        let result = match query {
            StoreQuery::Get(key) => self.backend.get(key).map(|v| match v {
                Some(v) => QueryOutcome::Success(v),
                None => QueryOutcome::Failure(StoreFailure::NoSuchKey),
            }),
            StoreQuery::Exists(key) => self
                .backend
                .get(key)
                .map(|v| QueryOutcome::Success(Data::Boolean(v.is_some()))),
            StoreQuery::Keys => self
                .backend
                .snapshot()
                .map(|entries| QueryOutcome::Success(Data::Vector(entries.into_iter().map(|(k, _)| k).collect()))),
        };

        result.unwrap_or_else(|e| {
            error!(store = %self.name, "backend failure while answering query: {}", e);
            QueryOutcome::Failure(StoreFailure::BackendFailure)
        })
    }

    pub fn take_responses(&mut self) -> Vec<StoreResponse> {
        self.responses.drain(..).collect()
    }

    // -
    // Replication traffic

    pub fn handle_message(
        &mut self,
        msg: StoreMessage,
        now: f64,
    ) -> Result<StoreEffects> {
        let role = self.role();
        match msg {
            StoreMessage::Put {
                key,
                value,
                expiry,
                publisher,
            } if role == StoreRole::Master => {
                trace!(store = %self.name, %publisher, "remote put");
                self.commit_put(key, value, expiry, now)
            }
            StoreMessage::Erase { key, publisher } if role == StoreRole::Master => {
                trace!(store = %self.name, %publisher, "remote erase");
                self.commit_erase(key)
            }
            StoreMessage::Clear { publisher } if role == StoreRole::Master => {
                trace!(store = %self.name, %publisher, "remote clear");
                self.commit_clear()
            }
            StoreMessage::Attach { clone_node } if role == StoreRole::Master => self.send_snapshot(&clone_node),
            StoreMessage::Snapshot {
                master_node,
                epoch,
                seq,
                entries,
            } if role == StoreRole::Clone => self.apply_snapshot(master_node, epoch, seq, entries, now),
            StoreMessage::Update { epoch, seq, mutation } if role == StoreRole::Clone => {
                self.apply_update(epoch, seq, mutation)
            }
            msg => {
                debug!(store = %self.name, role = role.as_str(), ?msg, "ignoring message not meant for this role");
                Ok(StoreEffects::default())
            }
        }
    }

    fn send_snapshot(
        &self,
        clone_node: &str,
    ) -> Result<StoreEffects> {
        let RoleState::Master(m) = &self.role else {
            return Ok(StoreEffects::default());
        };
        info!(store = %self.name, clone_node, "clone attached, sending snapshot");
        let snapshot = StoreMessage::Snapshot {
            master_node: self.node_id.clone(),
            epoch: m.epoch.clone(),
            seq: m.seq,
            entries: self.backend.snapshot()?,
        };
        Ok(StoreEffects {
            outbound: vec![(self.clone_topic.clone(), snapshot)],
            committed: vec![],
        })
    }

    /// Replaces the replica with the master's snapshot, committing only the
    /// difference so that repeated snapshots project as no-ops.
    fn apply_snapshot(
        &mut self,
        master_node: String,
        epoch: String,
        seq: u64,
        entries: Vec<(Data, Data)>,
        now: f64,
    ) -> Result<StoreEffects> {
        let current: BTreeMap<Data, Data> = self.backend.snapshot()?.into_iter().collect();
        let incoming: BTreeMap<Data, Data> = entries.into_iter().collect();
        let mut effects = StoreEffects::default();

        for key in current.keys() {
            if !incoming.contains_key(key) {
                self.backend.erase(key)?;
                effects.committed.push(Mutation::Erase { key: key.clone() });
            }
        }
        for (key, value) in incoming {
            match current.get(&key) {
                None => {
                    self.backend.put(key.clone(), value.clone())?;
                    effects.committed.push(Mutation::Insert { key, value });
                }
                Some(old) if *old != value => {
                    self.backend.put(key.clone(), value.clone())?;
                    effects.committed.push(Mutation::Update { key, value });
                }
                Some(_) => {}
            }
        }

        let RoleState::Clone(c) = &mut self.role else {
            return Ok(effects);
        };
        if !c.connected {
            info!(store = %self.name, %master_node, seq, "clone synchronized with master");
        }
        c.connected = true;
        c.synced = true;
        c.stale_reported = false;
        c.resync_requested = false;
        c.master_node = Some(master_node);
        c.epoch = Some(epoch);
        c.last_seq = seq;

        // Buffered commands go out in their original order.
        let replay: Vec<StoreMessage> = c.buffered.drain(..).collect();
        if !replay.is_empty() {
            info!(store = %self.name, count = replay.len(), "replaying buffered mutations");
        }
        effects
            .outbound
            .extend(replay.into_iter().map(|cmd| (self.master_topic.clone(), cmd)));

        let deferred: Vec<(u64, StoreQuery)> = c.deferred.drain(..).collect();
        for (request_id, query) in deferred {
            self.query(request_id, query, now);
        }

        Ok(effects)
    }

    fn apply_update(
        &mut self,
        epoch: String,
        seq: u64,
        mutation: Mutation,
    ) -> Result<StoreEffects> {
        let RoleState::Clone(c) = &mut self.role else {
            return Ok(StoreEffects::default());
        };

        if !c.synced {
            trace!(store = %self.name, seq, "update before first snapshot, ignoring");
            return Ok(StoreEffects::default());
        }
        if c.epoch.as_deref() != Some(epoch.as_str()) {
            info!(store = %self.name, %epoch, seq, "update from a new master incarnation");
            return Ok(self.request_resync());
        }
        if seq <= c.last_seq {
            trace!(store = %self.name, seq, last = c.last_seq, "duplicate update");
            return Ok(StoreEffects::default());
        }
        if seq != c.last_seq + 1 {
            warn!(store = %self.name, seq, last = c.last_seq, "gap in update stream");
            return Ok(self.request_resync());
        }
        c.last_seq = seq;

        match &mutation {
            Mutation::Insert { key, value } | Mutation::Update { key, value } => {
                self.backend.put(key.clone(), value.clone())?;
            }
            Mutation::Erase { key } => {
                self.backend.erase(key)?;
            }
            Mutation::Clear => self.backend.clear()?,
        }

        Ok(StoreEffects {
            outbound: vec![],
            committed: vec![mutation],
        })
    }

    /// Asks the master for a fresh snapshot, once per broken update stream.
    /// Updates are ignored until the snapshot arrives.
    fn request_resync(&mut self) -> StoreEffects {
        let RoleState::Clone(c) = &mut self.role else {
            return StoreEffects::default();
        };
        if c.resync_requested {
            return StoreEffects::default();
        }
        debug!(store = %self.name, "requesting resync");
        c.resync_requested = true;
        StoreEffects {
            outbound: vec![(self.master_topic.clone(), StoreMessage::Attach {
                clone_node: self.node_id.clone(),
            })],
            committed: vec![],
        }
    }

    // -
    // Time and connectivity

    /// Runs interval policies: key expiry on masters; resync attempts,
    /// staleness and buffer expiry on clones.
    pub fn tick(
        &mut self,
        now: f64,
    ) -> Result<StoreEffects> {
        match &mut self.role {
            RoleState::Master(m) => {
                let expired: Vec<Data> = m
                    .expiries
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(k, _)| k.clone())
                    .collect();
                let mut effects = StoreEffects::default();
                for key in expired {
                    debug!(store = %self.name, %key, "key expired");
                    effects.merge(self.commit_erase(key)?);
                }
                Ok(effects)
            }
            RoleState::Clone(c) => {
                let mut effects = StoreEffects::default();
                if c.connected {
                    return Ok(effects);
                }

                if c.attach_due(now) {
                    trace!(store = %self.name, "requesting snapshot from master");
                    c.last_attach = Some(now);
                    effects.outbound.push((self.master_topic.clone(), StoreMessage::Attach {
                        clone_node: self.node_id.clone(),
                    }));
                }

                if !c.buffered.is_empty() && !c.buffering_allowed(now) {
                    warn!(
                        store = %self.name,
                        dropped = c.buffered.len(),
                        "mutation buffer interval elapsed, dropping buffered mutations"
                    );
                    c.buffered.clear();
                }

                if c.is_stale(now) && !c.stale_reported {
                    warn!(store = %self.name, "clone is stale");
                    c.stale_reported = true;
                    let deferred: Vec<(u64, StoreQuery)> = c.deferred.drain(..).collect();
                    self.responses.extend(deferred.into_iter().map(|(request_id, _)| StoreResponse {
                        request_id,
                        outcome: QueryOutcome::Failure(StoreFailure::Stale),
                    }));
                }

                Ok(effects)
            }
        }
    }

    /// The peer at `node_id` went away; a clone whose master lived there
    /// starts its staleness countdown now.
    pub fn peer_lost(
        &mut self,
        node_id: &str,
        now: f64,
    ) {
        if let RoleState::Clone(c) = &mut self.role {
            if c.connected && c.master_node.as_deref() == Some(node_id) {
                warn!(store = %self.name, master = node_id, "lost connection to master");
                c.connected = false;
                c.resync_requested = false;
                c.disconnected_since = now;
                c.last_attach = Some(now);
            }
        }
    }

    /// A new peer may host our master: retry right away.
    pub fn peer_added(&mut self) {
        if let RoleState::Clone(c) = &mut self.role {
            if !c.connected {
                c.last_attach = None;
            }
        }
    }
}
