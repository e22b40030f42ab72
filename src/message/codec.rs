use std::collections::BTreeMap;

use super::*;
use crate::constants::PROTOCOL_VERSION;
use crate::MalformedMessage;

const KIND_EVENT: u64 = 1;
const KIND_LOG_CREATE: u64 = 2;
const KIND_LOG_WRITE: u64 = 3;
const KIND_IDENTIFIER_UPDATE: u64 = 4;
const KIND_BATCH: u64 = 5;
const KIND_STORE: u64 = 6;
const KIND_STATUS: u64 = 7;
const KIND_ERROR: u64 = 8;

/// Sequential reader over the elements of an encoded body.
pub(crate) struct Fields {
    kind: &'static str,
    items: std::vec::IntoIter<Data>,
}

impl Fields {
    pub(crate) fn new(
        kind: &'static str,
        body: Data,
    ) -> Result<Self, MalformedMessage> {
        match body {
            Data::Vector(items) => Ok(Self {
                kind,
                items: items.into_iter(),
            }),
            _ => Err(MalformedMessage::BadField { kind, field: "body" }),
        }
    }

    fn bad(
        &self,
        field: &'static str,
    ) -> MalformedMessage {
        MalformedMessage::BadField {
            kind: self.kind,
            field,
        }
    }

    pub(crate) fn data(
        &mut self,
        field: &'static str,
    ) -> Result<Data, MalformedMessage> {
        self.items.next().ok_or_else(|| self.bad(field))
    }

    pub(crate) fn string(
        &mut self,
        field: &'static str,
    ) -> Result<String, MalformedMessage> {
        self.data(field)?.into_string().ok_or_else(|| self.bad(field))
    }

    pub(crate) fn count(
        &mut self,
        field: &'static str,
    ) -> Result<u64, MalformedMessage> {
        self.data(field)?.as_count().ok_or_else(|| self.bad(field))
    }

    pub(crate) fn real(
        &mut self,
        field: &'static str,
    ) -> Result<f64, MalformedMessage> {
        self.data(field)?.as_real().ok_or_else(|| self.bad(field))
    }

    pub(crate) fn boolean(
        &mut self,
        field: &'static str,
    ) -> Result<bool, MalformedMessage> {
        self.data(field)?.as_bool().ok_or_else(|| self.bad(field))
    }

    pub(crate) fn vector(
        &mut self,
        field: &'static str,
    ) -> Result<Vec<Data>, MalformedMessage> {
        self.data(field)?.into_vector().ok_or_else(|| self.bad(field))
    }
}

impl Message {
    /// Wraps the message into its wire envelope.
    pub fn to_data(&self) -> Data {
        let (kind, body) = match self {
            Message::Event(ev) => (
                KIND_EVENT,
                Data::Vector(vec![ev.name.clone().into(), Data::Vector(ev.args.clone())]),
            ),
            Message::LogCreate(lc) => (
                KIND_LOG_CREATE,
                Data::Vector(vec![
                    lc.stream.clone().into(),
                    lc.writer.clone().into(),
                    encode_writer_info(&lc.info),
                    Data::Vector(lc.fields.iter().map(encode_field).collect()),
                ]),
            ),
            Message::LogWrite(lw) => (
                KIND_LOG_WRITE,
                Data::Vector(vec![
                    lw.stream.clone().into(),
                    lw.writer.clone().into(),
                    lw.path.clone().into(),
                    Data::Vector(lw.vals.clone()),
                ]),
            ),
            Message::IdentifierUpdate(iu) => (
                KIND_IDENTIFIER_UPDATE,
                Data::Vector(vec![iu.id_name.clone().into(), iu.id_value.clone()]),
            ),
            Message::Batch(msgs) => (
                KIND_BATCH,
                Data::Vector(msgs.iter().map(Message::to_data).collect()),
            ),
            Message::Store(sm) => (KIND_STORE, sm.to_data()),
            Message::Status(st) => (
                KIND_STATUS,
                Data::Vector(vec![
                    Data::Count(st.code as u64),
                    encode_endpoint(st.context.as_ref()),
                    st.message.clone().into(),
                ]),
            ),
            Message::Error(err) => (
                KIND_ERROR,
                Data::Vector(vec![
                    Data::Count(err.code as u64),
                    encode_endpoint(err.context.as_ref()),
                    err.message.clone().into(),
                ]),
            ),
        };

        Data::Vector(vec![Data::Count(PROTOCOL_VERSION), Data::Count(kind), body])
    }

    /// Splits a batch envelope into its raw elements so that each one is
    /// classified on its own. Any other payload is handed back untouched.
    pub fn unpack_batch(data: Data) -> Result<Vec<Data>, Data> {
        match data {
            Data::Vector(mut items)
                if matches!(
                    items.as_slice(),
                    [Data::Count(PROTOCOL_VERSION), Data::Count(KIND_BATCH), Data::Vector(_)]
                ) =>
            {
                match items.pop() {
                    Some(Data::Vector(elements)) => Ok(elements),
                    _ => Ok(Vec::new()),
                }
            }
            other => Err(other),
        }
    }

    /// Classifies an inbound envelope.
    pub fn from_data(data: Data) -> Result<Message, MalformedMessage> {
        let mut items = match data {
            Data::Vector(items) if items.len() == 3 => items.into_iter(),
            _ => return Err(MalformedMessage::NotAnEnvelope),
        };

        let version = items.next().and_then(|d| d.as_count());
        let kind = items.next().and_then(|d| d.as_count());
        let body = items.next().unwrap_or_default();

        match version {
            Some(PROTOCOL_VERSION) => {}
            Some(v) => return Err(MalformedMessage::UnsupportedVersion(v)),
            None => return Err(MalformedMessage::NotAnEnvelope),
        }

        match kind {
            Some(KIND_EVENT) => {
                let mut f = Fields::new("event", body)?;
                Ok(Message::Event(Event {
                    name: f.string("name")?,
                    args: f.vector("args")?,
                }))
            }
            Some(KIND_LOG_CREATE) => {
                let mut f = Fields::new("log_create", body)?;
                let stream = f.string("stream")?;
                let writer = f.string("writer")?;
                let info = decode_writer_info(f.data("writer_info")?)?;
                let fields = f
                    .vector("fields")?
                    .into_iter()
                    .map(decode_field)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Message::LogCreate(LogCreate {
                    stream,
                    writer,
                    info,
                    fields,
                }))
            }
            Some(KIND_LOG_WRITE) => {
                let mut f = Fields::new("log_write", body)?;
                Ok(Message::LogWrite(LogWrite {
                    stream: f.string("stream")?,
                    writer: f.string("writer")?,
                    path: f.string("path")?,
                    vals: f.vector("vals")?,
                }))
            }
            Some(KIND_IDENTIFIER_UPDATE) => {
                let mut f = Fields::new("identifier_update", body)?;
                Ok(Message::IdentifierUpdate(IdentifierUpdate {
                    id_name: f.string("id_name")?,
                    id_value: f.data("id_value")?,
                }))
            }
            Some(KIND_BATCH) => {
                let msgs = Fields::new("batch", body)?.vector_remaining();
                Ok(Message::Batch(
                    msgs.into_iter()
                        .map(Message::from_data)
                        .collect::<Result<Vec<_>, _>>()?,
                ))
            }
            Some(KIND_STORE) => Ok(Message::Store(StoreMessage::from_data(body)?)),
            Some(KIND_STATUS) => {
                let mut f = Fields::new("status", body)?;
                let code = status_code(f.count("code")?).ok_or(MalformedMessage::BadField {
                    kind: "status",
                    field: "code",
                })?;
                Ok(Message::Status(Status {
                    code,
                    context: decode_endpoint("status", f.data("context")?)?,
                    message: f.string("message")?,
                }))
            }
            Some(KIND_ERROR) => {
                let mut f = Fields::new("error", body)?;
                let code = error_code(f.count("code")?).ok_or(MalformedMessage::BadField {
                    kind: "error",
                    field: "code",
                })?;
                Ok(Message::Error(ErrorStatus {
                    code,
                    context: decode_endpoint("error", f.data("context")?)?,
                    message: f.string("message")?,
                }))
            }
            Some(other) => Err(MalformedMessage::UnknownKind(other)),
            None => Err(MalformedMessage::NotAnEnvelope),
        }
    }
}

impl Fields {
    fn vector_remaining(self) -> Vec<Data> {
        self.items.collect()
    }
}

fn encode_writer_info(info: &WriterInfo) -> Data {
    let config = info
        .config
        .iter()
        .map(|(k, v)| (Data::from(k.as_str()), Data::from(v.as_str())))
        .collect::<BTreeMap<_, _>>();
    Data::Vector(vec![
        info.path.clone().into(),
        Data::Real(info.network_time),
        Data::Table(config),
    ])
}

fn decode_writer_info(data: Data) -> Result<WriterInfo, MalformedMessage> {
    let mut f = Fields::new("log_create", data)?;
    let path = f.string("writer_info.path")?;
    let network_time = f.real("writer_info.network_time")?;
    let config = match f.data("writer_info.config")? {
        Data::Table(t) => t
            .into_iter()
            .map(|(k, v)| match (k, v) {
                (Data::String(k), Data::String(v)) => Ok((k, v)),
                _ => Err(MalformedMessage::BadField {
                    kind: "log_create",
                    field: "writer_info.config",
                }),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?,
        _ => {
            return Err(MalformedMessage::BadField {
                kind: "log_create",
                field: "writer_info.config",
            })
        }
    };
    Ok(WriterInfo {
        path,
        network_time,
        config,
    })
}

fn encode_field(field: &LogField) -> Data {
    Data::Vector(vec![
        field.name.clone().into(),
        field.type_name.clone().into(),
        Data::Boolean(field.optional),
    ])
}

fn decode_field(data: Data) -> Result<LogField, MalformedMessage> {
    let mut f = Fields::new("log_create", data)?;
    Ok(LogField {
        name: f.string("field.name")?,
        type_name: f.string("field.type")?,
        optional: f.boolean("field.optional")?,
    })
}

pub(crate) fn encode_endpoint(endpoint: Option<&EndpointInfo>) -> Data {
    match endpoint {
        None => Data::None,
        Some(ep) => Data::Vector(vec![
            ep.node_id.clone().into(),
            match &ep.network {
                None => Data::None,
                Some(net) => Data::Vector(vec![net.address.clone().into(), Data::Count(net.port as u64)]),
            },
        ]),
    }
}

pub(crate) fn decode_endpoint(
    kind: &'static str,
    data: Data,
) -> Result<Option<EndpointInfo>, MalformedMessage> {
    if data.is_none() {
        return Ok(None);
    }
    let mut f = Fields::new(kind, data)?;
    let node_id = f.string("context.node_id")?;
    let network = match f.data("context.network")? {
        Data::None => None,
        net => {
            let mut n = Fields::new(kind, net)?;
            let address = n.string("context.address")?;
            let port = u16::try_from(n.count("context.port")?).map_err(|_| MalformedMessage::BadField {
                kind,
                field: "context.port",
            })?;
            Some(NetworkInfo { address, port })
        }
    };
    Ok(Some(EndpointInfo { node_id, network }))
}

fn status_code(code: u64) -> Option<StatusCode> {
    Some(match code {
        0 => StatusCode::Unspecified,
        1 => StatusCode::PeerAdded,
        2 => StatusCode::PeerRemoved,
        3 => StatusCode::PeerLost,
        4 => StatusCode::EndpointDiscovered,
        5 => StatusCode::EndpointUnreachable,
        _ => return None,
    })
}

fn error_code(code: u64) -> Option<ErrorCode> {
    Some(match code {
        0 => ErrorCode::Unspecified,
        1 => ErrorCode::PeerIncompatible,
        2 => ErrorCode::PeerInvalid,
        3 => ErrorCode::PeerUnavailable,
        4 => ErrorCode::PeerDisconnectDuringHandshake,
        5 => ErrorCode::PeerTimeout,
        6 => ErrorCode::MasterExists,
        7 => ErrorCode::NoSuchMaster,
        8 => ErrorCode::RequestTimeout,
        9 => ErrorCode::InvalidData,
        10 => ErrorCode::BackendFailure,
        11 => ErrorCode::StaleData,
        _ => return None,
    })
}
