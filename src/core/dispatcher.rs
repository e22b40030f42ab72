//! Inbound message classification.
//!
//! Every inbound `(topic, data)` pair is routed by topic first:
//! store-control topics carry replication traffic, the log namespace carries
//! log messages, and everything else carries events, identifier updates,
//! status and error notifications. A payload that does not belong to its
//! namespace is malformed; a malformed message is counted, reported and
//! dropped without affecting later messages.

use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::*;
use crate::parse_store_topic;
use crate::BrokerError;
use crate::Data;
use crate::ErrorStatus;
use crate::Event;
use crate::HostRuntime;
use crate::IdentifierUpdate;
use crate::LogCreate;
use crate::LogWrite;
use crate::MalformedMessage;
use crate::Message;
use crate::Reporter;
use crate::Result;
use crate::Status;
use crate::StatusCode;
use crate::StoreChannel;
use crate::StoreHandle;
use crate::StoreMessage;
use crate::StoreResponse;
use crate::Topic;
use crate::TypeConfig;
use crate::DISPATCH_ERRORS_METRIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    Store,
    Log,
    General,
}

impl Namespace {
    fn as_str(&self) -> &'static str {
        match self {
            Namespace::Store => "store",
            Namespace::Log => "log",
            Namespace::General => "general",
        }
    }
}

fn malformed(
    topic: &Topic,
    reason: MalformedMessage,
) -> BrokerError {
    BrokerError::Malformed {
        topic: topic.to_string(),
        reason,
    }
}

fn unexpected(
    topic: &Topic,
    msg: &Message,
    namespace: Namespace,
) -> BrokerError {
    malformed(topic, MalformedMessage::UnexpectedKind {
        kind: msg.kind_name(),
        namespace: namespace.as_str(),
    })
}

impl<T: TypeConfig> Manager<T> {
    /// Classifies one inbound message and hands it to its processor.
    /// Batch elements are classified one by one under the batch's topic.
    pub fn dispatch_message(
        &mut self,
        topic: &Topic,
        data: Data,
    ) {
        let data = match Message::unpack_batch(data) {
            Ok(elements) => {
                trace!(%topic, count = elements.len(), "unpacking batch");
                for element in elements {
                    self.dispatch_message(topic, element);
                }
                return;
            }
            Err(data) => data,
        };

        let result = match Message::from_data(data) {
            Ok(msg) => self.route_message(topic, msg),
            Err(reason) => Err(malformed(topic, reason).into()),
        };
        if let Err(e) = result {
            self.on_dispatch_error(&e);
        }
    }

    fn on_dispatch_error(
        &self,
        err: &crate::Error,
    ) {
        let label = match err {
            crate::Error::Broker(BrokerError::Malformed { reason, .. }) => reason.label(),
            other => other.kind(),
        };
        DISPATCH_ERRORS_METRIC.with_label_values(&[label]).inc();
        self.report(&CallContext::Internal, err);
    }

    fn namespace_of(
        &self,
        topic: &Topic,
    ) -> Namespace {
        if parse_store_topic(&self.config.store.topic_prefix, topic).is_some() {
            Namespace::Store
        } else if topic.matches_prefix(&self.config.log.default_topic_prefix) {
            Namespace::Log
        } else {
            Namespace::General
        }
    }

    fn route_message(
        &mut self,
        topic: &Topic,
        msg: Message,
    ) -> Result<()> {
        let namespace = self.namespace_of(topic);
        trace!(%topic, kind = msg.kind_name(), namespace = namespace.as_str(), "dispatch");

        match (namespace, msg) {
            (_, Message::Batch(msgs)) => {
                for inner in msgs {
                    if let Err(e) = self.route_message(topic, inner) {
                        self.on_dispatch_error(&e);
                    }
                }
                Ok(())
            }

            (Namespace::Store, Message::Store(store_msg)) => self.process_store_event(topic, store_msg),
            (Namespace::Store, other) => Err(unexpected(topic, &other, Namespace::Store).into()),
            (_, other @ Message::Store(_)) => Err(unexpected(topic, &other, namespace).into()),

            (_, Message::LogCreate(create)) => {
                self.process_log_create(create);
                Ok(())
            }
            (_, Message::LogWrite(write)) => {
                self.process_log_write(write);
                Ok(())
            }
            (Namespace::Log, other) => Err(unexpected(topic, &other, Namespace::Log).into()),

            (_, Message::Event(event)) => {
                self.process_event(topic, event);
                Ok(())
            }
            (_, Message::IdentifierUpdate(update)) => {
                self.process_identifier_update(update);
                Ok(())
            }
            (_, Message::Status(status)) => {
                self.process_status(status);
                Ok(())
            }
            (_, Message::Error(err)) => {
                self.process_error(err);
                Ok(())
            }
        }
    }

    /// Feeds replication traffic to the local store it addresses. Traffic
    /// for stores not open on this node is ignored.
    pub(super) fn process_store_event(
        &mut self,
        topic: &Topic,
        msg: StoreMessage,
    ) -> Result<()> {
        let Some((name, channel)) = parse_store_topic(&self.config.store.topic_prefix, topic) else {
            return Err(BrokerError::UnknownStore(topic.to_string()).into());
        };
        let name = name.to_string();
        let now = self.now();

        let Some((_, store)) = self.stores.get_by_name_mut(&name) else {
            trace!(store = %name, "replication message for a store not open here");
            return Ok(());
        };

        let role = store.role();
        let addressed = matches!(
            (channel, role),
            (StoreChannel::Master, crate::StoreRole::Master) | (StoreChannel::Clone, crate::StoreRole::Clone)
        );
        if !addressed {
            trace!(store = %name, ?channel, "replication message for the other role");
            return Ok(());
        }

        let effects = store.handle_message(msg, now)?;
        self.apply_store_effects(&name, role, effects);
        Ok(())
    }

    pub(super) fn process_event(
        &mut self,
        topic: &Topic,
        event: Event,
    ) {
        if self
            .forwarded_prefixes
            .iter()
            .any(|prefix| topic.matches_prefix(prefix))
        {
            trace!(%topic, event = %event.name, "forwarded event not raised locally");
            return;
        }

        self.stats.num_events_incoming += 1;
        if !self.host.has_event(&event.name) {
            self.report_message(
                &CallContext::Internal,
                &format!("process remote event: unknown event '{}'", event.name),
            );
            return;
        }
        self.host.deliver_event(topic, event);
    }

    pub(super) fn process_log_create(
        &mut self,
        create: LogCreate,
    ) {
        let stream = create.stream.clone();
        let writer = create.writer.clone();
        if !self.host.log_create(create) {
            self.report_message(
                &CallContext::Internal,
                &format!("failed to create remote log stream '{}' (writer '{}')", stream, writer),
            );
        }
    }

    pub(super) fn process_log_write(
        &mut self,
        write: LogWrite,
    ) {
        self.stats.num_logs_incoming += 1;
        let stream = write.stream.clone();
        if !self.host.log_write(write) {
            self.report_message(
                &CallContext::Internal,
                &format!("failed to write remote log record to stream '{}'", stream),
            );
        }
    }

    pub(super) fn process_identifier_update(
        &mut self,
        update: IdentifierUpdate,
    ) {
        self.stats.num_ids_incoming += 1;
        let id = update.id_name.clone();
        if !self.host.identifier_update(update) {
            self.report_message(
                &CallContext::Internal,
                &format!("failed to update remote identifier '{}'", id),
            );
        }
    }

    /// Tracks the peer count and replication connectivity, then hands the
    /// status to the host.
    pub(super) fn process_status(
        &mut self,
        status: Status,
    ) {
        let now = self.now();
        let peer = status
            .context
            .as_ref()
            .map(|ctx| ctx.node_id.clone())
            .unwrap_or_default();

        match status.code {
            StatusCode::PeerAdded => {
                self.peer_count += 1;
                debug!(%peer, peers = self.peer_count, "peer added");
                for (_, store) in self.stores.iter_mut() {
                    store.peer_added();
                }
            }
            StatusCode::PeerRemoved | StatusCode::PeerLost => {
                self.peer_count = self.peer_count.saturating_sub(1);
                debug!(%peer, peers = self.peer_count, code = ?status.code, "peer gone");
                for (_, store) in self.stores.iter_mut() {
                    store.peer_lost(&peer, now);
                }
            }
            _ => {}
        }

        self.reporter.report_status(&status.message);
        self.host.peer_status(&status);
    }

    pub(super) fn process_error(
        &mut self,
        err: ErrorStatus,
    ) {
        warn!(code = ?err.code, "{}", err.message);
        self.reporter.report_error(&err.message);
        self.host.peer_error(&err);
    }

    /// Completes the tracked query a store response belongs to. Responses
    /// without a pending query are discarded.
    pub(super) fn process_store_response(
        &mut self,
        handle: StoreHandle,
        response: StoreResponse,
    ) {
        let id = QueryId {
            request_id: response.request_id,
            handle,
        };
        if !self.queries.resolve(id, response.outcome) {
            trace!(query = %id, "discarding response without a pending query");
        }
    }
}
