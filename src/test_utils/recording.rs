use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Data;
use crate::ErrorStatus;
use crate::Event;
use crate::HostRuntime;
use crate::IdentifierUpdate;
use crate::LogCreate;
use crate::LogWrite;
use crate::Reporter;
use crate::Status;
use crate::Topic;

#[derive(Debug, Default)]
pub struct HostRecord {
    /// Events the host has handlers for. Empty: every event is known.
    pub known_events: BTreeSet<String>,
    pub identifiers: HashMap<String, Data>,
    pub reject_logs: bool,

    pub events: Vec<(Topic, Event)>,
    pub log_creates: Vec<LogCreate>,
    pub log_writes: Vec<LogWrite>,
    pub id_updates: Vec<IdentifierUpdate>,
    pub statuses: Vec<Status>,
    pub errors: Vec<ErrorStatus>,
}

/// Host that records everything it receives. Clones share the record.
#[derive(Debug, Default, Clone)]
pub struct RecordingHost {
    pub state: Arc<Mutex<HostRecord>>,
}

impl RecordingHost {
    pub fn with_events(names: &[&str]) -> Self {
        let host = Self::default();
        host.state.lock().known_events = names.iter().map(|n| n.to_string()).collect();
        host
    }

    pub fn set_identifier(
        &self,
        name: &str,
        value: Data,
    ) {
        self.state.lock().identifiers.insert(name.to_string(), value);
    }

    pub fn events(&self) -> Vec<(Topic, Event)> {
        self.state.lock().events.clone()
    }

    pub fn log_writes(&self) -> Vec<LogWrite> {
        self.state.lock().log_writes.clone()
    }
}

impl HostRuntime for RecordingHost {
    fn has_event(
        &self,
        name: &str,
    ) -> bool {
        let state = self.state.lock();
        state.known_events.is_empty() || state.known_events.contains(name)
    }

    fn deliver_event(
        &mut self,
        topic: &Topic,
        event: Event,
    ) {
        self.state.lock().events.push((topic.clone(), event));
    }

    fn log_create(
        &mut self,
        create: LogCreate,
    ) -> bool {
        let mut state = self.state.lock();
        state.log_creates.push(create);
        !state.reject_logs
    }

    fn log_write(
        &mut self,
        write: LogWrite,
    ) -> bool {
        let mut state = self.state.lock();
        state.log_writes.push(write);
        !state.reject_logs
    }

    fn identifier_update(
        &mut self,
        update: IdentifierUpdate,
    ) -> bool {
        let mut state = self.state.lock();
        state.identifiers.insert(update.id_name.clone(), update.id_value.clone());
        state.id_updates.push(update);
        true
    }

    fn lookup_identifier(
        &self,
        name: &str,
    ) -> Option<Data> {
        self.state.lock().identifiers.get(name).cloned()
    }

    fn peer_status(
        &mut self,
        status: &Status,
    ) {
        self.state.lock().statuses.push(status.clone());
    }

    fn peer_error(
        &mut self,
        error: &ErrorStatus,
    ) {
        self.state.lock().errors.push(error.clone());
    }
}

/// Reporter that keeps every message. Clones share the record.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    pub errors: Arc<Mutex<Vec<String>>>,
    pub statuses: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn has_error_containing(
        &self,
        needle: &str,
    ) -> bool {
        self.errors.lock().iter().any(|e| e.contains(needle))
    }
}

impl Reporter for RecordingReporter {
    fn report_error(
        &self,
        message: &str,
    ) {
        self.errors.lock().push(message.to_string());
    }

    fn report_status(
        &self,
        message: &str,
    ) {
        self.statuses.lock().push(message.to_string());
    }
}
