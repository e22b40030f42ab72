use std::fmt::Debug;

use crate::HostRuntime;
use crate::MemoryChannel;
use crate::MessageChannel;
use crate::Reporter;
use crate::TracingHost;
use crate::TracingReporter;

/// Binds the collaborators a [`crate::Manager`] is generic over.
pub trait TypeConfig: Sync + Send + Sized + Debug + Clone + Copy + Default + 'static {
    type C: MessageChannel;

    type H: HostRuntime;

    type R: Reporter;
}

/// Standalone node: in-process fabric, tracing-backed host and reporter.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct BrokerTypeConfig;

impl TypeConfig for BrokerTypeConfig {
    type C = MemoryChannel;

    type H = TracingHost;

    type R = TracingReporter;
}

pub mod alias {
    use super::TypeConfig;

    pub type COF<T> = <T as TypeConfig>::C;

    pub type HOF<T> = <T as TypeConfig>::H;

    pub type ROF<T> = <T as TypeConfig>::R;
}
