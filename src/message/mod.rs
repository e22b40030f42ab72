//! Typed messages exchanged over the pub/sub fabric.
//!
//! Every message travels as a [`Data`] envelope
//! `(version, kind, body)`; [`Message::from_data`] classifies an inbound
//! envelope into exactly one variant or rejects it as malformed.

mod codec;
mod data;
mod topic;

pub(crate) use codec::*;
pub use data::*;
pub use topic::*;


use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::StoreMessage;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub args: Vec<Data>,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        args: Vec<Data>,
    ) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Backend initialization information for a remote log writer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriterInfo {
    pub path: String,
    pub network_time: f64,
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogField {
    pub name: String,
    pub type_name: String,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogCreate {
    pub stream: String,
    pub writer: String,
    pub info: WriterInfo,
    pub fields: Vec<LogField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogWrite {
    pub stream: String,
    pub writer: String,
    pub path: String,
    pub vals: Vec<Data>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierUpdate {
    pub id_name: String,
    pub id_value: Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub address: String,
    pub port: u16,
}

/// Identity of a remote endpoint as reported by the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub node_id: String,
    pub network: Option<NetworkInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Unspecified = 0,
    PeerAdded = 1,
    PeerRemoved = 2,
    PeerLost = 3,
    EndpointDiscovered = 4,
    EndpointUnreachable = 5,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub code: StatusCode,
    pub context: Option<EndpointInfo>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unspecified = 0,
    PeerIncompatible = 1,
    PeerInvalid = 2,
    PeerUnavailable = 3,
    PeerDisconnectDuringHandshake = 4,
    PeerTimeout = 5,
    MasterExists = 6,
    NoSuchMaster = 7,
    RequestTimeout = 8,
    InvalidData = 9,
    BackendFailure = 10,
    StaleData = 11,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorStatus {
    pub code: ErrorCode,
    pub context: Option<EndpointInfo>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Event(Event),
    LogCreate(LogCreate),
    LogWrite(LogWrite),
    IdentifierUpdate(IdentifierUpdate),
    /// Several messages published to the same topic in one send.
    Batch(Vec<Message>),
    /// Store replication traffic on a store-control topic.
    Store(StoreMessage),
    Status(Status),
    Error(ErrorStatus),
}

impl Message {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::Event(_) => "event",
            Message::LogCreate(_) => "log_create",
            Message::LogWrite(_) => "log_write",
            Message::IdentifierUpdate(_) => "identifier_update",
            Message::Batch(_) => "batch",
            Message::Store(_) => "store",
            Message::Status(_) => "status",
            Message::Error(_) => "error",
        }
    }
}
