use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use super::*;
use crate::alias::COF;
use crate::alias::HOF;
use crate::alias::ROF;
use crate::connect_retry_override;
use crate::default_log_topic;
use crate::open_backend;
use crate::BackendKind;
use crate::BackendOptions;
use crate::BrokerConfig;
use crate::BrokerError;
use crate::Clock;
use crate::CloneParams;
use crate::Data;
use crate::DataStore;
use crate::Error;
use crate::Event;
use crate::ExternalTable;
use crate::ForwardingBridge;
use crate::HostRuntime;
use crate::IdentifierUpdate;
use crate::LogCreate;
use crate::LogTopicFn;
use crate::LogWrite;
use crate::Message;
use crate::MessageChannel;
use crate::PeerInfo;
use crate::Reporter;
use crate::Result;
use crate::StoreEffects;
use crate::StoreHandle;
use crate::StoreQuery;
use crate::StoreRegistry;
use crate::StoreRole;
use crate::Topic;
use crate::TypeConfig;
use crate::STORE_MUTATIONS_METRIC;

/// Coordination core of a broker node.
///
/// Owns the stores, pending queries, log buffers and forwarding
/// associations, and drives them from a single [`Manager::process`] call per
/// poll tick. Public operations never fail loudly: errors are logged, handed
/// to the reporter and turned into `bool`/`Option` results.
pub struct Manager<T: TypeConfig> {
    pub(super) config: BrokerConfig,
    pub(super) channel: COF<T>,
    pub(super) host: HOF<T>,
    pub(super) reporter: ROF<T>,
    pub(super) node_id: String,
    pub(super) clock: Clock,

    pub(super) stores: StoreRegistry,
    pub(super) queries: QueryTracker,
    pub(super) log_buffers: LogBufferPool,
    pub(super) forwarding: ForwardingBridge,
    log_topic_fn: LogTopicFn,

    subscriptions: BTreeSet<String>,
    /// Prefixes routed through this node but not raised locally.
    pub(super) forwarded_prefixes: BTreeSet<String>,
    /// Event name to the topics it is automatically published on.
    auto_publish: BTreeMap<String, BTreeSet<Topic>>,

    pub(super) stats: Stats,
    pub(super) peer_count: usize,
    bound_port: u16,
    next_request_id: u64,
    last_log_flush: f64,
    after_init: bool,
}

impl<T: TypeConfig> std::fmt::Debug for Manager<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("node_id", &self.node_id)
            .field("stores", &self.stores.len())
            .field("pending_queries", &self.queries.len())
            .field("peers", &self.peer_count)
            .finish()
    }
}

impl<T: TypeConfig> Manager<T> {
    pub fn new(
        config: BrokerConfig,
        channel: COF<T>,
        host: HOF<T>,
        reporter: ROF<T>,
    ) -> Self {
        let node_id = channel.node_id();
        let clock = Clock::new(config.channel.use_real_time);
        let log_buffers = LogBufferPool::new(config.log.batch_size);
        let log_topic_fn = default_log_topic(&config.log.default_topic_prefix);
        let last_log_flush = clock.now();

        info!(%node_id, real_time = config.channel.use_real_time, "broker manager created");

        Self {
            config,
            channel,
            host,
            reporter,
            node_id,
            clock,
            stores: StoreRegistry::new(),
            queries: QueryTracker::new(),
            log_buffers,
            forwarding: ForwardingBridge::new(),
            log_topic_fn,
            subscriptions: BTreeSet::new(),
            forwarded_prefixes: BTreeSet::new(),
            auto_publish: BTreeMap::new(),
            stats: Stats::default(),
            peer_count: 0,
            bound_port: 0,
            next_request_id: 1,
            last_log_flush,
            after_init: false,
        }
    }

    // -
    // Lifecycle

    /// Marks the end of host initialization.
    pub fn init_post_script(&mut self) {
        self.after_init = true;
        self.last_log_flush = self.now();
        debug!(node_id = %self.node_id, "host initialization complete");
    }

    pub fn is_initialized(&self) -> bool {
        self.after_init
    }

    /// Flushes pending log writes and resolves every pending query with a
    /// timeout.
    pub fn terminate(&mut self) {
        let flushed = self.flush_log_buffers();
        let abandoned = self.flush_pending_queries();
        info!(node_id = %self.node_id, flushed, abandoned, "broker manager terminated");
    }

    /// Whether any communication is currently active.
    pub fn active(&self) -> bool {
        self.bound_port > 0 || self.peer_count > 0 || !self.stores.is_empty()
    }

    /// Moves simulated time forward. Ignored when running on real time or
    /// when `t` lies in the past.
    pub fn advance_time(
        &mut self,
        t: f64,
    ) {
        if !self.clock.advance(t) {
            trace!(t, "advance_time ignored");
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn host(&self) -> &HOF<T> {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut HOF<T> {
        &mut self.host
    }

    pub fn set_log_topic_fn(
        &mut self,
        f: LogTopicFn,
    ) {
        self.log_topic_fn = f;
    }

    // -
    // Peering

    /// Returns the bound port, or 0 on failure.
    pub fn listen(
        &mut self,
        ctx: &CallContext,
        address: &str,
        port: u16,
    ) -> u16 {
        match self.channel.listen(address, port) {
            Ok(bound) => {
                self.bound_port = bound;
                bound
            }
            Err(e) => {
                self.report(ctx, &e);
                0
            }
        }
    }

    /// Initiates a peering. `BROKER_DEFAULT_CONNECT_RETRY` overrides `retry`.
    pub fn peer(
        &mut self,
        ctx: &CallContext,
        address: &str,
        port: u16,
        retry: Duration,
    ) {
        let retry = connect_retry_override().unwrap_or(retry);
        debug!(address, port, ?retry, "peering");
        if let Err(e) = self.channel.peer(address, port, retry) {
            self.report(ctx, &e);
        }
    }

    pub fn unpeer(
        &mut self,
        ctx: &CallContext,
        address: &str,
        port: u16,
    ) {
        if let Err(e) = self.channel.unpeer(address, port) {
            self.report(ctx, &e);
        }
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.channel.peers()
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    // -
    // Publishing

    fn publish(
        &mut self,
        topic: &Topic,
        msg: Message,
    ) -> Result<()> {
        trace!(%topic, kind = msg.kind_name(), "publish");
        self.channel.publish(topic, msg.to_data())
    }

    pub fn publish_event(
        &mut self,
        ctx: &CallContext,
        topic: &Topic,
        event: Event,
    ) -> bool {
        match self.publish(topic, Message::Event(event)) {
            Ok(()) => {
                self.stats.num_events_outgoing += 1;
                true
            }
            Err(e) => {
                self.report(ctx, &e);
                false
            }
        }
    }

    /// Sends the current value of the host identifier `id`.
    pub fn publish_identifier(
        &mut self,
        ctx: &CallContext,
        topic: &Topic,
        id: &str,
    ) -> bool {
        let Some(value) = self.host.lookup_identifier(id) else {
            self.report_message(ctx, &format!("unknown identifier '{}'", id));
            return false;
        };
        let update = IdentifierUpdate {
            id_name: id.to_string(),
            id_value: value,
        };
        match self.publish(topic, Message::IdentifierUpdate(update)) {
            Ok(()) => {
                self.stats.num_ids_outgoing += 1;
                true
            }
            Err(e) => {
                self.report(ctx, &e);
                false
            }
        }
    }

    /// Announces a log stream; sent right away, not buffered.
    pub fn publish_log_create(
        &mut self,
        ctx: &CallContext,
        create: LogCreate,
    ) -> bool {
        let topic = (self.log_topic_fn)(&create.stream, &create.writer);
        match self.publish(&topic, Message::LogCreate(create)) {
            Ok(()) => true,
            Err(e) => {
                self.report(ctx, &e);
                false
            }
        }
    }

    /// Buffers a log write for its topic. A buffer reaching the batch size
    /// is flushed immediately.
    pub fn publish_log_write(
        &mut self,
        _ctx: &CallContext,
        write: LogWrite,
    ) -> bool {
        let topic = (self.log_topic_fn)(&write.stream, &write.writer);
        if self.log_buffers.push(topic.clone(), Message::LogWrite(write)) {
            self.flush_log_topic(&topic);
        }
        true
    }

    fn flush_log_topic(
        &mut self,
        topic: &Topic,
    ) -> usize {
        let channel = &mut self.channel;
        let sent = self
            .log_buffers
            .flush_topic(topic, &mut |t: &Topic, m: Message| channel.publish(t, m.to_data()));
        self.stats.num_logs_outgoing += sent;
        sent
    }

    /// Sends every pending log write. Returns the number of messages sent.
    pub fn flush_log_buffers(&mut self) -> usize {
        self.last_log_flush = self.now();
        let channel = &mut self.channel;
        let sent = self
            .log_buffers
            .flush_all(&mut |t: &Topic, m: Message| channel.publish(t, m.to_data()));
        self.stats.num_logs_outgoing += sent;
        sent
    }

    pub fn pending_log_writes(&self) -> usize {
        self.log_buffers.pending()
    }

    // -
    // Automatic event publication

    pub fn auto_publish_event(
        &mut self,
        ctx: &CallContext,
        topic: &Topic,
        event_name: &str,
    ) -> bool {
        if !self.host.has_event(event_name) {
            self.report_message(ctx, &format!("auto publish of unknown event '{}'", event_name));
            return false;
        }
        debug!(%topic, event = event_name, "enabled automatic publication");
        self.auto_publish
            .entry(event_name.to_string())
            .or_default()
            .insert(topic.clone());
        true
    }

    /// Returns false if the pair was never registered.
    pub fn auto_unpublish_event(
        &mut self,
        ctx: &CallContext,
        topic: &Topic,
        event_name: &str,
    ) -> bool {
        let removed = match self.auto_publish.get_mut(event_name) {
            Some(topics) => {
                let removed = topics.remove(topic);
                if topics.is_empty() {
                    self.auto_publish.remove(event_name);
                }
                removed
            }
            None => false,
        };
        if !removed {
            self.report_message(
                ctx,
                &format!("event '{}' is not auto-published on '{}'", event_name, topic),
            );
        }
        removed
    }

    /// Called by the host whenever it raises `event` locally: publishes it on
    /// every topic registered for automatic publication. Returns the number
    /// of topics it was sent to.
    pub fn raise_local_event(
        &mut self,
        ctx: &CallContext,
        event: &Event,
    ) -> usize {
        let topics: Vec<Topic> = match self.auto_publish.get(&event.name) {
            Some(topics) => topics.iter().cloned().collect(),
            None => return 0,
        };
        topics
            .iter()
            .filter(|topic| self.publish_event(ctx, topic, event.clone()))
            .count()
    }

    // -
    // Subscriptions

    /// Returns true if `prefix` is a new subscription.
    pub fn subscribe(
        &mut self,
        ctx: &CallContext,
        prefix: &str,
    ) -> bool {
        if self.subscriptions.contains(prefix) {
            return false;
        }
        if let Err(e) = self.channel.subscribe(prefix) {
            self.report(ctx, &e);
            return false;
        }
        self.subscriptions.insert(prefix.to_string());
        true
    }

    /// Subscribes to `prefix` for routing only: matching events are not
    /// raised locally.
    pub fn forward(
        &mut self,
        ctx: &CallContext,
        prefix: &str,
    ) -> bool {
        if self.forwarded_prefixes.contains(prefix) {
            return false;
        }
        if let Err(e) = self.channel.subscribe(prefix) {
            self.report(ctx, &e);
            return false;
        }
        self.forwarded_prefixes.insert(prefix.to_string());
        true
    }

    pub fn unsubscribe(
        &mut self,
        ctx: &CallContext,
        prefix: &str,
    ) -> bool {
        let was_subscribed = self.subscriptions.remove(prefix);
        let was_forwarded = self.forwarded_prefixes.remove(prefix);
        if !was_subscribed && !was_forwarded {
            return false;
        }
        if let Err(e) = self.channel.unsubscribe(prefix) {
            self.report(ctx, &e);
            return false;
        }
        true
    }

    // -
    // Stores

    #[instrument(skip(self, ctx, options))]
    pub fn make_master(
        &mut self,
        ctx: &CallContext,
        name: &str,
        kind: BackendKind,
        options: BackendOptions,
    ) -> Option<StoreHandle> {
        match self.try_make_master(name, kind, &options) {
            Ok(handle) => {
                info!(store = name, ?kind, "master store created");
                self.check_forwarding(name);
                Some(handle)
            }
            Err(e) => {
                self.report(ctx, &e);
                None
            }
        }
    }

    fn try_make_master(
        &mut self,
        name: &str,
        kind: BackendKind,
        options: &BackendOptions,
    ) -> Result<StoreHandle> {
        self.ensure_unique_store(name)?;
        let backend = open_backend(kind, name, options, &self.config.store.backend_root_dir)?;
        let store = DataStore::new_master(name, &self.node_id, &self.config.store.topic_prefix, backend);
        self.register_store(store)
    }

    /// Creates a clone with explicit replication parameters, or the
    /// configured defaults when `params` is `None`.
    #[instrument(skip(self, ctx))]
    pub fn make_clone(
        &mut self,
        ctx: &CallContext,
        name: &str,
        params: Option<CloneParams>,
    ) -> Option<StoreHandle> {
        let params = params.unwrap_or_else(|| self.config.store.default_clone_params());
        let result = self.ensure_unique_store(name).and_then(|_| {
            let store = DataStore::new_clone(name, &self.node_id, &self.config.store.topic_prefix, params, self.now());
            self.register_store(store)
        });

        match result {
            Ok(handle) => {
                info!(store = name, ?params, "clone store created");
                // Ask for a snapshot right away instead of waiting a tick.
                self.tick_store(handle);
                self.check_forwarding(name);
                Some(handle)
            }
            Err(e) => {
                self.report(ctx, &e);
                None
            }
        }
    }

    fn ensure_unique_store(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.stores.lookup(name).is_some() {
            return Err(BrokerError::DuplicateName {
                kind: "store",
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn register_store(
        &mut self,
        store: DataStore,
    ) -> Result<StoreHandle> {
        self.channel.subscribe(store.inbound_topic().as_str())?;
        self.stores.insert(store)
    }

    pub fn lookup_store(
        &self,
        name: &str,
    ) -> Option<StoreHandle> {
        self.stores.lookup(name)
    }

    pub fn store(
        &self,
        handle: StoreHandle,
    ) -> Option<&DataStore> {
        self.stores.get(handle).ok()
    }

    /// Associates an external table with the store `name`. The store does
    /// not need to exist yet; seeding happens once both are present.
    pub fn add_forwarded_store(
        &mut self,
        ctx: &CallContext,
        name: &str,
        table: Box<dyn ExternalTable>,
    ) -> bool {
        if let Err(e) = self.forwarding.add(name, table) {
            self.report(ctx, &e);
            return false;
        }
        self.check_forwarding(name);
        true
    }

    /// Seeds the forwarded table of `name` if both the store and the
    /// association exist and seeding has not happened yet.
    pub fn check_forwarding(
        &mut self,
        name: &str,
    ) {
        let now = self.now();
        let Some((_, store)) = self.stores.get_by_name_mut(name) else {
            return;
        };
        let role = store.role();
        match self.forwarding.check(store, now) {
            Ok(Some(effects)) => self.apply_store_effects(name, role, effects),
            Ok(None) => {}
            Err(e) => self.report(&CallContext::Internal, &e),
        }
    }

    /// Closes `name`: its handles turn invalid, its pending queries resolve
    /// with a timeout and its forwarding association is dropped.
    #[instrument(skip(self, ctx))]
    pub fn close_store(
        &mut self,
        ctx: &CallContext,
        name: &str,
    ) -> bool {
        let Some((handle, store)) = self.stores.remove(name) else {
            debug!(store = name, "close of unknown store");
            return false;
        };
        let abandoned = self.queries.abandon_store(handle);
        self.forwarding.remove(name);
        if let Err(e) = self.channel.unsubscribe(store.inbound_topic().as_str()) {
            self.report(ctx, &e);
        }
        info!(store = name, abandoned, "store closed");
        true
    }

    /// Tracks `callback` under `(request_id, handle)`.
    pub fn track_store_query(
        &mut self,
        ctx: &CallContext,
        handle: StoreHandle,
        request_id: u64,
        callback: StoreQueryCallback,
    ) -> bool {
        if !self.stores.contains(handle) {
            self.report(ctx, &BrokerError::InvalidHandle(handle).into());
            return false;
        }
        let timeout = callback
            .timeout
            .unwrap_or(self.config.store.default_query_timeout_secs);
        let deadline = self.now() + timeout;
        match self
            .queries
            .track(QueryId { request_id, handle }, callback.callback, deadline)
        {
            Ok(()) => true,
            Err(e) => {
                self.report(ctx, &e);
                false
            }
        }
    }

    /// Issues `query` against the store and tracks its callback. Returns the
    /// request id; the outcome arrives on a later `process` call.
    pub fn store_query(
        &mut self,
        ctx: &CallContext,
        handle: StoreHandle,
        query: StoreQuery,
        callback: StoreQueryCallback,
    ) -> Option<u64> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        if !self.track_store_query(ctx, handle, request_id, callback) {
            return None;
        }
        let now = self.now();
        match self.stores.get_mut(handle) {
            Ok(store) => {
                store.query(request_id, query, now);
                Some(request_id)
            }
            Err(e) => {
                self.report(ctx, &e);
                None
            }
        }
    }

    pub fn store_put(
        &mut self,
        ctx: &CallContext,
        handle: StoreHandle,
        key: Data,
        value: Data,
        expiry: Option<f64>,
    ) -> bool {
        self.mutate_store(ctx, handle, |store, now| store.put(key, value, expiry, now))
    }

    pub fn store_erase(
        &mut self,
        ctx: &CallContext,
        handle: StoreHandle,
        key: Data,
    ) -> bool {
        self.mutate_store(ctx, handle, |store, now| store.erase(key, now))
    }

    pub fn store_clear(
        &mut self,
        ctx: &CallContext,
        handle: StoreHandle,
    ) -> bool {
        self.mutate_store(ctx, handle, |store, now| store.clear(now))
    }

    fn mutate_store(
        &mut self,
        ctx: &CallContext,
        handle: StoreHandle,
        op: impl FnOnce(&mut DataStore, f64) -> Result<StoreEffects>,
    ) -> bool {
        let now = self.now();
        let result = self
            .stores
            .get_mut(handle)
            .and_then(|store| Ok((store.name().to_string(), store.role(), op(store, now)?)));
        match result {
            Ok((name, role, effects)) => {
                self.apply_store_effects(&name, role, effects);
                true
            }
            Err(e) => {
                self.report(ctx, &e);
                false
            }
        }
    }

    /// Publishes replication traffic and projects committed mutations onto
    /// the forwarded table.
    pub(super) fn apply_store_effects(
        &mut self,
        name: &str,
        role: StoreRole,
        effects: StoreEffects,
    ) {
        for (topic, msg) in effects.outbound {
            if let Err(e) = self.publish(&topic, Message::Store(msg)) {
                warn!(store = name, %topic, "failed to send store message: {}", e);
                self.report(&CallContext::Internal, &e);
            }
        }
        if !effects.committed.is_empty() {
            STORE_MUTATIONS_METRIC
                .with_label_values(&[name, role.as_str()])
                .inc_by(effects.committed.len() as u64);
            self.forwarding.project(name, &effects.committed);
        }
    }

    /// Resolves every pending query with a timeout.
    pub fn flush_pending_queries(&mut self) -> usize {
        self.queries.flush_all()
    }

    /// Flushes pending queries and clears the contents of every master.
    /// Clones follow through replication.
    pub fn clear_stores(&mut self) {
        self.flush_pending_queries();
        let masters: Vec<StoreHandle> = self
            .stores
            .handles()
            .into_iter()
            .filter(|h| matches!(self.stores.get(*h), Ok(store) if store.role() == StoreRole::Master))
            .collect();
        for handle in masters {
            self.mutate_store(&CallContext::Internal, handle, |store, now| store.clear(now));
        }
    }

    pub fn stats(&self) -> Stats {
        Stats {
            num_peers: self.peer_count,
            num_stores: self.stores.len(),
            num_pending_queries: self.queries.len(),
            ..self.stats
        }
    }

    // -
    // Poll loop

    /// One poll tick: drains inbound messages, runs store interval policies,
    /// hands store responses to the query tracker, times out expired queries
    /// and flushes log buffers when their interval has elapsed. Returns the
    /// number of inbound messages handled.
    pub fn process(&mut self) -> usize {
        let mut handled = 0;
        while handled < self.config.channel.max_messages_per_tick {
            let Some((topic, data)) = self.channel.try_receive() else {
                break;
            };
            self.dispatch_message(&topic, data);
            handled += 1;
        }

        for handle in self.stores.handles() {
            self.tick_store(handle);
        }

        let now = self.now();
        let timed_out = self.queries.sweep(now);
        if timed_out > 0 {
            debug!(timed_out, "store queries timed out");
        }

        let flush_interval = self.config.log.flush_interval_ms as f64 / 1000.0;
        if now - self.last_log_flush >= flush_interval {
            self.flush_log_buffers();
        }

        handled
    }

    fn tick_store(
        &mut self,
        handle: StoreHandle,
    ) {
        let now = self.now();
        let Ok(store) = self.stores.get_mut(handle) else {
            return;
        };
        let name = store.name().to_string();
        let role = store.role();
        let result = store.tick(now);
        let responses = store.take_responses();

        match result {
            Ok(effects) => self.apply_store_effects(&name, role, effects),
            Err(e) => self.report(&CallContext::Internal, &e),
        }
        for response in responses {
            self.process_store_response(handle, response);
        }
    }

    /// Calls [`Manager::process`] every `poll_interval_ms` until `shutdown`
    /// fires, then terminates.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.channel.poll_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Use biased to ensure branch order
                biased;
                // P0: shutdown received;
                _ = shutdown.changed() => {
                    warn!("[Broker:{}] shutdown signal received.", self.node_id);
                    break;
                }
                // P1: poll tick
                _ = interval.tick() => {
                    let handled = self.process();
                    if handled > 0 {
                        trace!(handled, "processed inbound messages");
                    }
                }
            }
        }

        self.terminate();
        Ok(())
    }

    // -
    // Reporting

    pub(super) fn report(
        &self,
        ctx: &CallContext,
        err: &Error,
    ) {
        let message = ctx.decorate(&err.to_string());
        error!(kind = err.kind(), "{}", message);
        self.reporter.report_error(&message);
    }

    pub(super) fn report_message(
        &self,
        ctx: &CallContext,
        message: &str,
    ) {
        let message = ctx.decorate(message);
        warn!("{}", message);
        self.reporter.report_error(&message);
    }
}
