use super::RecordingHost;
use super::RecordingReporter;
use crate::MemoryChannel;
use crate::MockHostRuntime;
use crate::MockMessageChannel;
use crate::MockReporter;
use crate::TypeConfig;

/// Real in-process channel with recording host and reporter.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct TestTypeConfig;

impl TypeConfig for TestTypeConfig {
    type C = MemoryChannel;

    type H = RecordingHost;

    type R = RecordingReporter;
}

/// Every collaborator mocked.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockTypeConfig;

impl TypeConfig for MockTypeConfig {
    type C = MockMessageChannel;

    type H = MockHostRuntime;

    type R = MockReporter;
}
