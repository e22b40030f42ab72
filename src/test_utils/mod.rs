//! Fixtures shared by the unit tests: recording collaborators, type configs
//! and helpers to stand up managers on a shared in-process hub.
mod mock_type_config;
mod recording;

pub use mock_type_config::*;
pub use recording::*;

use crate::BrokerConfig;
use crate::Manager;
use crate::MemoryHub;
use crate::DEFAULT_LOG_TOPIC_PREFIX;

/// Simulated clock and a log batch size of 3.
pub fn test_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.channel.use_real_time = false;
    config.log.batch_size = 3;
    config
}

pub struct TestNode {
    pub manager: Manager<TestTypeConfig>,
    pub host: RecordingHost,
    pub reporter: RecordingReporter,
}

impl TestNode {
    pub fn new(hub: &MemoryHub) -> Self {
        Self::with_config(hub, test_config())
    }

    pub fn with_config(
        hub: &MemoryHub,
        config: BrokerConfig,
    ) -> Self {
        let host = RecordingHost::default();
        let reporter = RecordingReporter::default();
        let manager = Manager::new(config, hub.endpoint(), host.clone(), reporter.clone());
        Self {
            manager,
            host,
            reporter,
        }
    }

    pub fn node_id(&self) -> String {
        self.manager.node_id().to_string()
    }
}

/// Two nodes peered over `hub`, both subscribed to the log namespace, with
/// the peering notifications already processed.
pub fn peered_pair(hub: &MemoryHub) -> (TestNode, TestNode) {
    let ctx = crate::CallContext::Internal;
    let mut a = TestNode::new(hub);
    let mut b = TestNode::new(hub);

    let port = a.manager.listen(&ctx, "127.0.0.1", 0);
    assert!(port > 0);
    b.manager.peer(&ctx, "127.0.0.1", port, std::time::Duration::from_secs(1));
    a.manager.subscribe(&ctx, DEFAULT_LOG_TOPIC_PREFIX);
    b.manager.subscribe(&ctx, DEFAULT_LOG_TOPIC_PREFIX);

    a.manager.process();
    b.manager.process();
    (a, b)
}

/// Runs `process` on every node until a full round handles no message.
pub fn settle(nodes: &mut [&mut TestNode]) {
    for _ in 0..16 {
        let handled: usize = nodes.iter_mut().map(|n| n.manager.process()).sum();
        if handled == 0 {
            return;
        }
    }
}

