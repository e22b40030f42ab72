//! Store replication wire protocol.
//!
//! Clones send commands on `<prefix><name>/master`; the master answers with
//! snapshots and numbered updates on `<prefix><name>/clone`. Snapshots and
//! updates carry the epoch of the master incarnation that produced them, so
//! a master recreated under the same name restarts its numbering safely.

use crate::Data;
use crate::message::Fields;
use crate::MalformedMessage;

/// A committed change to a store, in commit order.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert { key: Data, value: Data },
    Update { key: Data, value: Data },
    Erase { key: Data },
    Clear,
}

impl Mutation {
    pub fn key(&self) -> Option<&Data> {
        match self {
            Mutation::Insert { key, .. } | Mutation::Update { key, .. } | Mutation::Erase { key } => Some(key),
            Mutation::Clear => None,
        }
    }

    fn to_data(&self) -> Data {
        match self {
            Mutation::Insert { key, value } => Data::Vector(vec![Data::Count(0), key.clone(), value.clone()]),
            Mutation::Update { key, value } => Data::Vector(vec![Data::Count(1), key.clone(), value.clone()]),
            Mutation::Erase { key } => Data::Vector(vec![Data::Count(2), key.clone()]),
            Mutation::Clear => Data::Vector(vec![Data::Count(3)]),
        }
    }

    fn from_data(data: Data) -> Result<Self, MalformedMessage> {
        let mut f = Fields::new("store", data)?;
        match f.count("mutation.tag")? {
            0 => Ok(Mutation::Insert {
                key: f.data("mutation.key")?,
                value: f.data("mutation.value")?,
            }),
            1 => Ok(Mutation::Update {
                key: f.data("mutation.key")?,
                value: f.data("mutation.value")?,
            }),
            2 => Ok(Mutation::Erase {
                key: f.data("mutation.key")?,
            }),
            3 => Ok(Mutation::Clear),
            _ => Err(MalformedMessage::BadField {
                kind: "store",
                field: "mutation.tag",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreMessage {
    Put {
        key: Data,
        value: Data,
        expiry: Option<f64>,
        publisher: String,
    },
    Erase {
        key: Data,
        publisher: String,
    },
    Clear {
        publisher: String,
    },
    /// Resynchronization request from a clone.
    Attach { clone_node: String },
    Snapshot {
        master_node: String,
        epoch: String,
        seq: u64,
        entries: Vec<(Data, Data)>,
    },
    Update {
        epoch: String,
        seq: u64,
        mutation: Mutation,
    },
}

const TAG_PUT: u64 = 0;
const TAG_ERASE: u64 = 1;
const TAG_CLEAR: u64 = 2;
const TAG_ATTACH: u64 = 3;
const TAG_SNAPSHOT: u64 = 4;
const TAG_UPDATE: u64 = 5;

impl StoreMessage {
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            StoreMessage::Put { .. } | StoreMessage::Erase { .. } | StoreMessage::Clear { .. } | StoreMessage::Attach { .. }
        )
    }

    pub(crate) fn to_data(&self) -> Data {
        match self {
            StoreMessage::Put {
                key,
                value,
                expiry,
                publisher,
            } => Data::Vector(vec![
                Data::Count(TAG_PUT),
                key.clone(),
                value.clone(),
                expiry.map(Data::Real).unwrap_or_default(),
                publisher.clone().into(),
            ]),
            StoreMessage::Erase { key, publisher } => {
                Data::Vector(vec![Data::Count(TAG_ERASE), key.clone(), publisher.clone().into()])
            }
            StoreMessage::Clear { publisher } => Data::Vector(vec![Data::Count(TAG_CLEAR), publisher.clone().into()]),
            StoreMessage::Attach { clone_node } => {
                Data::Vector(vec![Data::Count(TAG_ATTACH), clone_node.clone().into()])
            }
            StoreMessage::Snapshot {
                master_node,
                epoch,
                seq,
                entries,
            } => Data::Vector(vec![
                Data::Count(TAG_SNAPSHOT),
                master_node.clone().into(),
                epoch.clone().into(),
                Data::Count(*seq),
                Data::Vector(
                    entries
                        .iter()
                        .map(|(k, v)| Data::Vector(vec![k.clone(), v.clone()]))
                        .collect(),
                ),
            ]),
            StoreMessage::Update { epoch, seq, mutation } => Data::Vector(vec![
                Data::Count(TAG_UPDATE),
                epoch.clone().into(),
                Data::Count(*seq),
                mutation.to_data(),
            ]),
        }
    }

    pub(crate) fn from_data(data: Data) -> Result<Self, MalformedMessage> {
        let mut f = Fields::new("store", data)?;
        match f.count("tag")? {
            TAG_PUT => {
                let key = f.data("key")?;
                let value = f.data("value")?;
                let expiry = match f.data("expiry")? {
                    Data::None => None,
                    d => Some(d.as_real().ok_or(MalformedMessage::BadField {
                        kind: "store",
                        field: "expiry",
                    })?),
                };
                Ok(StoreMessage::Put {
                    key,
                    value,
                    expiry,
                    publisher: f.string("publisher")?,
                })
            }
            TAG_ERASE => Ok(StoreMessage::Erase {
                key: f.data("key")?,
                publisher: f.string("publisher")?,
            }),
            TAG_CLEAR => Ok(StoreMessage::Clear {
                publisher: f.string("publisher")?,
            }),
            TAG_ATTACH => Ok(StoreMessage::Attach {
                clone_node: f.string("clone_node")?,
            }),
            TAG_SNAPSHOT => {
                let master_node = f.string("master_node")?;
                let epoch = f.string("epoch")?;
                let seq = f.count("seq")?;
                let entries = f
                    .vector("entries")?
                    .into_iter()
                    .map(|pair| {
                        let mut p = Fields::new("store", pair)?;
                        Ok((p.data("entry.key")?, p.data("entry.value")?))
                    })
                    .collect::<Result<Vec<_>, MalformedMessage>>()?;
                Ok(StoreMessage::Snapshot {
                    master_node,
                    epoch,
                    seq,
                    entries,
                })
            }
            TAG_UPDATE => Ok(StoreMessage::Update {
                epoch: f.string("epoch")?,
                seq: f.count("seq")?,
                mutation: Mutation::from_data(f.data("mutation")?)?,
            }),
            _ => Err(MalformedMessage::BadField {
                kind: "store",
                field: "tag",
            }),
        }
    }
}

/// Read request issued against a store frontend.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreQuery {
    Get(Data),
    Exists(Data),
    Keys,
}

/// Why a query failed without timing out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailure {
    NoSuchKey,
    Stale,
    BackendFailure,
}

/// Final result delivered to a query callback.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Success(Data),
    Failure(StoreFailure),
    Timeout,
}

/// Response produced by a store frontend for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResponse {
    pub request_id: u64,
    pub outcome: QueryOutcome,
}
