#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use d_broker::BrokerConfig;
use d_broker::CallContext;
use d_broker::Data;
use d_broker::ErrorStatus;
use d_broker::Event;
use d_broker::HostRuntime;
use d_broker::IdentifierUpdate;
use d_broker::LogCreate;
use d_broker::LogWrite;
use d_broker::Manager;
use d_broker::MemoryChannel;
use d_broker::MemoryHub;
use d_broker::QueryOutcome;
use d_broker::Reporter;
use d_broker::Status;
use d_broker::StoreQueryCallback;
use d_broker::Topic;
use d_broker::TypeConfig;
use d_broker::DEFAULT_LOG_TOPIC_PREFIX;
use parking_lot::Mutex;

static LOGGER_INIT: Once = Once::new();

pub fn enable_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Default)]
pub struct Received {
    pub events: Vec<(Topic, Event)>,
    pub log_creates: Vec<LogCreate>,
    pub log_writes: Vec<LogWrite>,
    pub identifiers: std::collections::HashMap<String, Data>,
    pub statuses: Vec<Status>,
    pub errors: Vec<ErrorStatus>,
    pub reports: Vec<String>,
}

/// Host and reporter in one, sharing a single record between clones.
#[derive(Debug, Default, Clone)]
pub struct Recorder(pub Arc<Mutex<Received>>);

impl HostRuntime for Recorder {
    fn has_event(
        &self,
        name: &str,
    ) -> bool {
        !name.starts_with("unknown")
    }

    fn deliver_event(
        &mut self,
        topic: &Topic,
        event: Event,
    ) {
        self.0.lock().events.push((topic.clone(), event));
    }

    fn log_create(
        &mut self,
        create: LogCreate,
    ) -> bool {
        self.0.lock().log_creates.push(create);
        true
    }

    fn log_write(
        &mut self,
        write: LogWrite,
    ) -> bool {
        self.0.lock().log_writes.push(write);
        true
    }

    fn identifier_update(
        &mut self,
        update: IdentifierUpdate,
    ) -> bool {
        self.0.lock().identifiers.insert(update.id_name, update.id_value);
        true
    }

    fn lookup_identifier(
        &self,
        name: &str,
    ) -> Option<Data> {
        self.0.lock().identifiers.get(name).cloned()
    }

    fn peer_status(
        &mut self,
        status: &Status,
    ) {
        self.0.lock().statuses.push(status.clone());
    }

    fn peer_error(
        &mut self,
        error: &ErrorStatus,
    ) {
        self.0.lock().errors.push(error.clone());
    }
}

impl Reporter for Recorder {
    fn report_error(
        &self,
        message: &str,
    ) {
        self.0.lock().reports.push(message.to_string());
    }

    fn report_status(
        &self,
        _message: &str,
    ) {
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct IntegrationTypeConfig;

impl TypeConfig for IntegrationTypeConfig {
    type C = MemoryChannel;

    type H = Recorder;

    type R = Recorder;
}

pub struct Node {
    pub manager: Manager<IntegrationTypeConfig>,
    pub recorder: Recorder,
}

impl Node {
    pub fn new(hub: &MemoryHub) -> Self {
        let mut config = BrokerConfig::default();
        config.channel.use_real_time = false;
        config.log.batch_size = 3;

        let recorder = Recorder::default();
        let manager = Manager::new(config, hub.endpoint(), recorder.clone(), recorder.clone());
        Self { manager, recorder }
    }

    pub fn id(&self) -> String {
        self.manager.node_id().to_string()
    }

    pub fn advance_to(
        &mut self,
        t: f64,
    ) {
        self.manager.advance_time(t);
        self.manager.process();
    }
}

pub fn ctx() -> CallContext {
    CallContext::Internal
}

/// `a` listens, `b` peers with it; both subscribe to the log namespace.
pub fn peered_pair(hub: &MemoryHub) -> (Node, Node) {
    let mut a = Node::new(hub);
    let mut b = Node::new(hub);
    let port = a.manager.listen(&ctx(), "127.0.0.1", 0);
    b.manager.peer(&ctx(), "127.0.0.1", port, Duration::from_secs(1));
    a.manager.subscribe(&ctx(), DEFAULT_LOG_TOPIC_PREFIX);
    b.manager.subscribe(&ctx(), DEFAULT_LOG_TOPIC_PREFIX);
    settle(&mut [&mut a, &mut b]);
    (a, b)
}

/// Processes all nodes until a full round handles no message.
pub fn settle(nodes: &mut [&mut Node]) {
    for _ in 0..32 {
        let handled: usize = nodes.iter_mut().map(|n| n.manager.process()).sum();
        if handled == 0 {
            return;
        }
    }
}

/// Moves every node's clock to `t` and lets the traffic settle.
pub fn advance_all(
    nodes: &mut [&mut Node],
    t: f64,
) {
    for n in nodes.iter_mut() {
        n.manager.advance_time(t);
    }
    settle(nodes);
}

pub type Outcomes = Arc<Mutex<Vec<QueryOutcome>>>;

pub fn callback(outcomes: &Outcomes) -> StoreQueryCallback {
    let outcomes = outcomes.clone();
    StoreQueryCallback::new(move |outcome| outcomes.lock().push(outcome))
}
