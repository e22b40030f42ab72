/// Communication statistics. Only the peer, store and pending-query counts
/// ever decrease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub num_peers: usize,
    pub num_stores: usize,
    pub num_pending_queries: usize,
    pub num_events_incoming: usize,
    pub num_events_outgoing: usize,
    pub num_logs_incoming: usize,
    pub num_logs_outgoing: usize,
    pub num_ids_incoming: usize,
    pub num_ids_outgoing: usize,
}
