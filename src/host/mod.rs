//! Seams towards the embedding runtime: the host that consumes inbound
//! events, logs and identifier updates, and the reporter that surfaces
//! errors and peering changes to users.


use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;
use tracing::error;
use tracing::info;

use crate::Data;
use crate::ErrorStatus;
use crate::Event;
use crate::IdentifierUpdate;
use crate::LogCreate;
use crate::LogWrite;
use crate::Status;
use crate::Topic;

#[cfg_attr(test, automock)]
pub trait HostRuntime: Send + 'static {
    /// Whether an event handler called `name` exists.
    fn has_event(
        &self,
        name: &str,
    ) -> bool;

    fn deliver_event(
        &mut self,
        topic: &Topic,
        event: Event,
    );

    /// Returns false when the stream or writer is unknown.
    fn log_create(
        &mut self,
        create: LogCreate,
    ) -> bool;

    /// Returns false when the record cannot be written.
    fn log_write(
        &mut self,
        write: LogWrite,
    ) -> bool;

    /// Returns false when the identifier is unknown or the value does not
    /// fit its type.
    fn identifier_update(
        &mut self,
        update: IdentifierUpdate,
    ) -> bool;

    /// Current value of a global identifier.
    fn lookup_identifier(
        &self,
        name: &str,
    ) -> Option<Data>;

    fn peer_status(
        &mut self,
        status: &Status,
    );

    fn peer_error(
        &mut self,
        error: &ErrorStatus,
    );
}

/// Fire-and-forget sink for user-visible notifications.
#[cfg_attr(test, automock)]
pub trait Reporter: Send + 'static {
    fn report_error(
        &self,
        message: &str,
    );

    fn report_status(
        &self,
        message: &str,
    );
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report_error(
        &self,
        message: &str,
    ) {
        error!(target: "d_broker::reporter", "{}", message);
    }

    fn report_status(
        &self,
        message: &str,
    ) {
        info!(target: "d_broker::reporter", "{}", message);
    }
}

/// Host for a standalone node: accepts every event, logs what it receives
/// and keeps identifier values in memory.
#[derive(Debug, Default)]
pub struct TracingHost {
    identifiers: HashMap<String, Data>,
}

impl TracingHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostRuntime for TracingHost {
    fn has_event(
        &self,
        _name: &str,
    ) -> bool {
        true
    }

    fn deliver_event(
        &mut self,
        topic: &Topic,
        event: Event,
    ) {
        info!(%topic, name = %event.name, args = event.args.len(), "event received");
    }

    fn log_create(
        &mut self,
        create: LogCreate,
    ) -> bool {
        info!(stream = %create.stream, writer = %create.writer, path = %create.info.path, "log writer created");
        true
    }

    fn log_write(
        &mut self,
        write: LogWrite,
    ) -> bool {
        info!(stream = %write.stream, path = %write.path, fields = write.vals.len(), "log record received");
        true
    }

    fn identifier_update(
        &mut self,
        update: IdentifierUpdate,
    ) -> bool {
        info!(id = %update.id_name, value = %update.id_value, "identifier updated");
        self.identifiers.insert(update.id_name, update.id_value);
        true
    }

    fn lookup_identifier(
        &self,
        name: &str,
    ) -> Option<Data> {
        self.identifiers.get(name).cloned()
    }

    fn peer_status(
        &mut self,
        status: &Status,
    ) {
        info!(code = ?status.code, peer = ?status.context, "{}", status.message);
    }

    fn peer_error(
        &mut self,
        error: &ErrorStatus,
    ) {
        error!(code = ?error.code, peer = ?error.context, "{}", error.message);
    }
}
