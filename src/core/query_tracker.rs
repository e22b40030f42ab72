use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;
use tracing::trace;

use crate::BrokerError;
use crate::QueryOutcome;
use crate::Result;
use crate::StoreHandle;
use crate::QUERY_OUTCOME_METRIC;

/// Continuation invoked exactly once with the outcome of a store query.
pub type QueryCallback = Box<dyn FnOnce(QueryOutcome) + Send>;

/// Key of a pending query: unique while pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId {
    pub request_id: u64,
    pub handle: StoreHandle,
}

impl fmt::Display for QueryId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}@{}", self.request_id, self.handle)
    }
}

/// A query callback together with its timeout, in seconds.
pub struct StoreQueryCallback {
    pub callback: QueryCallback,
    pub timeout: Option<f64>,
}

impl StoreQueryCallback {
    pub fn new(callback: impl FnOnce(QueryOutcome) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            timeout: None,
        }
    }

    pub fn with_timeout(
        mut self,
        timeout: f64,
    ) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct PendingQuery {
    callback: QueryCallback,
    deadline: f64,
}

#[derive(Default)]
pub struct QueryTracker {
    pending: BTreeMap<QueryId, PendingQuery>,
}

impl fmt::Debug for QueryTracker {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("QueryTracker").field("pending", &self.pending.len()).finish()
    }
}

fn complete(
    id: QueryId,
    query: PendingQuery,
    outcome: QueryOutcome,
) {
    let label = match &outcome {
        QueryOutcome::Success(_) => "success",
        QueryOutcome::Failure(_) => "failure",
        QueryOutcome::Timeout => "timeout",
    };
    trace!(query = %id, outcome = label, "query resolved");
    QUERY_OUTCOME_METRIC.with_label_values(&[label]).inc();
    (query.callback)(outcome);
}

impl QueryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(
        &self,
        id: &QueryId,
    ) -> bool {
        self.pending.contains_key(id)
    }

    /// Registers `callback` under `id` until `deadline`. A key that is
    /// already pending is rejected and its callback dropped uninvoked.
    pub fn track(
        &mut self,
        id: QueryId,
        callback: QueryCallback,
        deadline: f64,
    ) -> Result<()> {
        if self.pending.contains_key(&id) {
            return Err(BrokerError::DuplicateName {
                kind: "query",
                name: id.to_string(),
            }
            .into());
        }
        self.pending.insert(id, PendingQuery { callback, deadline });
        Ok(())
    }

    /// Completes the query `id`. Returns false for unknown keys.
    pub fn resolve(
        &mut self,
        id: QueryId,
        outcome: QueryOutcome,
    ) -> bool {
        match self.pending.remove(&id) {
            Some(query) => {
                complete(id, query, outcome);
                true
            }
            None => false,
        }
    }

    /// Times out every query whose deadline has passed.
    pub fn sweep(
        &mut self,
        now: f64,
    ) -> usize {
        let expired: Vec<QueryId> = self
            .pending
            .iter()
            .filter(|(_, q)| q.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        self.timeout_all(expired)
    }

    /// Times out every query of a closed store.
    pub fn abandon_store(
        &mut self,
        handle: StoreHandle,
    ) -> usize {
        let ids: Vec<QueryId> = self.pending.keys().filter(|id| id.handle == handle).copied().collect();
        let n = self.timeout_all(ids);
        if n > 0 {
            debug!(%handle, abandoned = n, "abandoned queries of closed store");
        }
        n
    }

    /// Times out everything and clears the tracker.
    pub fn flush_all(&mut self) -> usize {
        let ids: Vec<QueryId> = self.pending.keys().copied().collect();
        self.timeout_all(ids)
    }

    fn timeout_all(
        &mut self,
        ids: Vec<QueryId>,
    ) -> usize {
        let mut n = 0;
        for id in ids {
            if let Some(query) = self.pending.remove(&id) {
                complete(id, query, QueryOutcome::Timeout);
                n += 1;
            }
        }
        n
    }
}
