//! Broker Error Hierarchy
//!
//! Defines the error types of the dispatch and store replication engine,
//! categorized by layer. None of them is fatal to the poll loop: public
//! `Manager` operations report them and turn them into boolean or optional
//! results.

use config::ConfigError;

use crate::StoreHandle;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (transport, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Dispatch and store protocol violations
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    /// Observability setup (log files, metrics endpoint)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    Sled(#[from] sled::Error),

    /// Serialization failures for persisted data
    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    /// Backend misconfiguration or unsupported operation
    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// publish/listen/peer failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound data that does not decode into a known message
    #[error("Malformed message on topic '{topic}': {reason}")]
    Malformed {
        topic: String,
        #[source]
        reason: MalformedMessage,
    },

    /// A store or query with the same key is already registered
    #[error("Duplicate {kind}: {name}")]
    DuplicateName { kind: &'static str, name: String },

    /// Operation referencing a store name that is not registered
    #[error("No such store: {0}")]
    UnknownStore(String),

    /// Handle whose store was closed (or never existed)
    #[error("Invalid store handle {0:?}: store was closed")]
    InvalidHandle(StoreHandle),
}

/// Reasons an inbound envelope is rejected by classification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedMessage {
    #[error("payload is not a message envelope")]
    NotAnEnvelope,

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u64),

    #[error("unrecognized message kind {0}")]
    UnknownKind(u64),

    #[error("{kind} message has an invalid '{field}' field")]
    BadField { kind: &'static str, field: &'static str },

    #[error("{kind} message is not allowed in the {namespace} namespace")]
    UnexpectedKind {
        kind: &'static str,
        namespace: &'static str,
    },
}

impl MalformedMessage {
    /// Label used by the dispatch error metric.
    pub fn label(&self) -> &'static str {
        match self {
            MalformedMessage::NotAnEnvelope => "not_an_envelope",
            MalformedMessage::UnsupportedVersion(_) => "unsupported_version",
            MalformedMessage::UnknownKind(_) => "unknown_kind",
            MalformedMessage::BadField { .. } => "bad_field",
            MalformedMessage::UnexpectedKind { .. } => "unexpected_kind",
        }
    }
}

impl Error {
    /// Short, stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::System(SystemError::Storage(_)) => "storage",
            Error::System(SystemError::Io(_)) => "io",
            Error::Config(_) => "config",
            Error::Broker(e) => match e {
                BrokerError::Transport(_) => "transport",
                BrokerError::Malformed { .. } => "malformed",
                BrokerError::DuplicateName { .. } => "duplicate_name",
                BrokerError::UnknownStore(_) => "unknown_store",
                BrokerError::InvalidHandle(_) => "invalid_handle",
            },
            Error::Fatal(_) => "fatal",
        }
    }
}

// ============== Conversion Implementations ============== //
impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::Sled(err).into()
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        StorageError::Bincode(err).into()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::System(SystemError::Io(err))
    }
}
