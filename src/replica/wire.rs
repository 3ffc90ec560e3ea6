//! Conversions between the replica's types and their protobuf form, shared by the WAL, the
//! snapshot files and the peer transport.

use crate::commitlog::Index;
use crate::grpc::{
    proto_message, ProtoAppendEntries, ProtoAppendEntriesResponse, ProtoConfChange, ProtoConfChangeKind,
    ProtoConfChangeSingle, ProtoConfigState, ProtoEntryKind, ProtoHardState, ProtoHeartbeat, ProtoHeartbeatResponse,
    ProtoInstallSnapshot, ProtoLogEntry, ProtoMessage, ProtoReadContext, ProtoReadIndex, ProtoReadIndexResponse,
    ProtoRequestVote, ProtoRequestVoteResponse, ProtoSnapshot, ProtoSnapshotMetadata,
};
use crate::replica::local_state::{HardState, Term};
use crate::replica::log_entry::{EntryKind, LogEntry, Snapshot, SnapshotMetadata};
use crate::replica::membership::{ConfChange, ConfChangeKind, ConfChangeSingle, ConfigState};
use crate::replica::message::{Message, MessageBody, ReadContext};
use crate::replica::peers::ReplicaId;
use bytes::Bytes;
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Unknown value {value} for enum field '{field}'")]
    UnknownEnumValue { field: &'static str, value: i32 },
    #[error("Malformed protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

pub(crate) fn encode_to_vec<M: prost::Message>(msg: &M) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    msg.encode(&mut buf)
        .expect("Encoding into a Vec can't run out of capacity");
    buf
}

// ------- Log types -------

pub(crate) fn entry_to_proto(entry: &LogEntry) -> ProtoLogEntry {
    let kind = match entry.kind {
        EntryKind::Normal => ProtoEntryKind::Normal,
        EntryKind::ConfChange => ProtoEntryKind::ConfChange,
    };
    ProtoLogEntry {
        term: entry.term.as_u64(),
        index: entry.index.as_u64(),
        kind: kind as i32,
        data: entry.data.to_vec(),
    }
}

pub(crate) fn entry_from_proto(proto: ProtoLogEntry) -> Result<LogEntry, DecodeError> {
    let kind = match ProtoEntryKind::from_i32(proto.kind) {
        Some(ProtoEntryKind::Normal) => EntryKind::Normal,
        Some(ProtoEntryKind::ConfChange) => EntryKind::ConfChange,
        None => {
            return Err(DecodeError::UnknownEnumValue {
                field: "LogEntry.kind",
                value: proto.kind,
            })
        }
    };
    Ok(LogEntry {
        term: Term::new(proto.term),
        index: Index::new(proto.index),
        kind,
        data: Bytes::from(proto.data),
    })
}

pub(crate) fn hard_state_to_proto(hard_state: &HardState) -> ProtoHardState {
    ProtoHardState {
        term: hard_state.term.as_u64(),
        voted_for: hard_state
            .voted_for
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default(),
        commit: hard_state.commit.as_u64(),
    }
}

pub(crate) fn hard_state_from_proto(proto: ProtoHardState) -> HardState {
    HardState {
        term: Term::new(proto.term),
        voted_for: if proto.voted_for.is_empty() {
            None
        } else {
            Some(ReplicaId::new(proto.voted_for))
        },
        commit: Index::new(proto.commit),
    }
}

fn ids_to_proto(ids: &BTreeSet<ReplicaId>) -> Vec<String> {
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

fn ids_from_proto(ids: Vec<String>) -> BTreeSet<ReplicaId> {
    ids.into_iter().map(ReplicaId::new).collect()
}

pub(crate) fn config_state_to_proto(config: &ConfigState) -> ProtoConfigState {
    ProtoConfigState {
        voters: ids_to_proto(&config.voters),
        learners: ids_to_proto(&config.learners),
        voters_outgoing: ids_to_proto(&config.voters_outgoing),
    }
}

pub(crate) fn config_state_from_proto(proto: ProtoConfigState) -> ConfigState {
    ConfigState {
        voters: ids_from_proto(proto.voters),
        learners: ids_from_proto(proto.learners),
        voters_outgoing: ids_from_proto(proto.voters_outgoing),
    }
}

pub(crate) fn snapshot_to_proto(snapshot: &Snapshot) -> ProtoSnapshot {
    ProtoSnapshot {
        metadata: Some(ProtoSnapshotMetadata {
            index: snapshot.metadata.index.as_u64(),
            term: snapshot.metadata.term.as_u64(),
            config_state: Some(config_state_to_proto(&snapshot.metadata.config_state)),
        }),
        data: snapshot.data.to_vec(),
    }
}

pub(crate) fn snapshot_from_proto(proto: ProtoSnapshot) -> Result<Snapshot, DecodeError> {
    let metadata = proto.metadata.ok_or(DecodeError::MissingField("Snapshot.metadata"))?;
    let config_state = metadata
        .config_state
        .ok_or(DecodeError::MissingField("SnapshotMetadata.config_state"))?;
    Ok(Snapshot {
        metadata: SnapshotMetadata {
            index: Index::new(metadata.index),
            term: Term::new(metadata.term),
            config_state: config_state_from_proto(config_state),
        },
        data: Bytes::from(proto.data),
    })
}

// ------- Membership changes -------

pub(crate) fn encode_conf_change(change: &ConfChange) -> Bytes {
    let changes = change
        .changes
        .iter()
        .map(|single| {
            let kind = match single.kind {
                ConfChangeKind::AddVoter => ProtoConfChangeKind::AddVoter,
                ConfChangeKind::AddLearner => ProtoConfChangeKind::AddLearner,
                ConfChangeKind::RemoveNode => ProtoConfChangeKind::RemoveNode,
            };
            ProtoConfChangeSingle {
                kind: kind as i32,
                replica_id: single.replica_id.as_str().to_string(),
                address: single.address.clone().unwrap_or_default(),
            }
        })
        .collect();

    Bytes::from(encode_to_vec(&ProtoConfChange { changes }))
}

pub(crate) fn decode_conf_change(data: &[u8]) -> Result<ConfChange, DecodeError> {
    let proto = <ProtoConfChange as prost::Message>::decode(data)?;

    let mut changes = Vec::with_capacity(proto.changes.len());
    for single in proto.changes {
        let kind = match ProtoConfChangeKind::from_i32(single.kind) {
            Some(ProtoConfChangeKind::AddVoter) => ConfChangeKind::AddVoter,
            Some(ProtoConfChangeKind::AddLearner) => ConfChangeKind::AddLearner,
            Some(ProtoConfChangeKind::RemoveNode) => ConfChangeKind::RemoveNode,
            None => {
                return Err(DecodeError::UnknownEnumValue {
                    field: "ConfChangeSingle.kind",
                    value: single.kind,
                })
            }
        };
        changes.push(ConfChangeSingle {
            kind,
            replica_id: ReplicaId::new(single.replica_id),
            address: if single.address.is_empty() {
                None
            } else {
                Some(single.address)
            },
        });
    }

    Ok(ConfChange { changes })
}

// ------- Peer messages -------

fn read_context_to_proto(read_context: ReadContext) -> ProtoReadContext {
    ProtoReadContext {
        origin: read_context.origin.into_inner(),
        id: read_context.id,
    }
}

fn read_context_from_proto(proto: ProtoReadContext) -> ReadContext {
    ReadContext {
        origin: ReplicaId::new(proto.origin),
        id: proto.id,
    }
}

fn required_read_context(proto: Option<ProtoReadContext>, field: &'static str) -> Result<ReadContext, DecodeError> {
    proto
        .map(read_context_from_proto)
        .ok_or(DecodeError::MissingField(field))
}

pub(crate) fn message_to_proto(message: Message) -> ProtoMessage {
    use proto_message::Body;

    let body = match message.body {
        MessageBody::RequestVote {
            last_log_index,
            last_log_term,
        } => Body::RequestVote(ProtoRequestVote {
            last_log_index: last_log_index.as_u64(),
            last_log_term: last_log_term.as_u64(),
        }),
        MessageBody::RequestVoteResponse { vote_granted } => {
            Body::RequestVoteResponse(ProtoRequestVoteResponse { vote_granted })
        }
        MessageBody::AppendEntries {
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        } => Body::AppendEntries(ProtoAppendEntries {
            prev_log_index: prev_log_index.as_u64(),
            prev_log_term: prev_log_term.as_u64(),
            entries: entries.iter().map(entry_to_proto).collect(),
            leader_commit: leader_commit.as_u64(),
        }),
        MessageBody::AppendEntriesResponse {
            success,
            index,
            reject_hint,
            hint_term,
        } => Body::AppendEntriesResponse(ProtoAppendEntriesResponse {
            success,
            index: index.as_u64(),
            reject_hint: reject_hint.as_u64(),
            hint_term: hint_term.as_u64(),
        }),
        MessageBody::InstallSnapshot { snapshot } => Body::InstallSnapshot(ProtoInstallSnapshot {
            snapshot: Some(snapshot_to_proto(&snapshot)),
        }),
        MessageBody::Heartbeat {
            leader_commit,
            read_context,
        } => Body::Heartbeat(ProtoHeartbeat {
            leader_commit: leader_commit.as_u64(),
            read_context: read_context.map(read_context_to_proto),
        }),
        MessageBody::HeartbeatResponse { read_context } => Body::HeartbeatResponse(ProtoHeartbeatResponse {
            read_context: read_context.map(read_context_to_proto),
        }),
        MessageBody::ReadIndex { read_context } => Body::ReadIndex(ProtoReadIndex {
            read_context: Some(read_context_to_proto(read_context)),
        }),
        MessageBody::ReadIndexResponse {
            read_context,
            read_index,
        } => Body::ReadIndexResponse(ProtoReadIndexResponse {
            read_context: Some(read_context_to_proto(read_context)),
            read_index: read_index.as_u64(),
        }),
    };

    ProtoMessage {
        from: message.from.into_inner(),
        to: message.to.into_inner(),
        term: message.term.as_u64(),
        body: Some(body),
    }
}

pub(crate) fn message_from_proto(proto: ProtoMessage) -> Result<Message, DecodeError> {
    use proto_message::Body;

    let body = match proto.body.ok_or(DecodeError::MissingField("Message.body"))? {
        Body::RequestVote(req) => MessageBody::RequestVote {
            last_log_index: Index::new(req.last_log_index),
            last_log_term: Term::new(req.last_log_term),
        },
        Body::RequestVoteResponse(resp) => MessageBody::RequestVoteResponse {
            vote_granted: resp.vote_granted,
        },
        Body::AppendEntries(req) => MessageBody::AppendEntries {
            prev_log_index: Index::new(req.prev_log_index),
            prev_log_term: Term::new(req.prev_log_term),
            entries: req
                .entries
                .into_iter()
                .map(entry_from_proto)
                .collect::<Result<Vec<_>, _>>()?,
            leader_commit: Index::new(req.leader_commit),
        },
        Body::AppendEntriesResponse(resp) => MessageBody::AppendEntriesResponse {
            success: resp.success,
            index: Index::new(resp.index),
            reject_hint: Index::new(resp.reject_hint),
            hint_term: Term::new(resp.hint_term),
        },
        Body::InstallSnapshot(req) => MessageBody::InstallSnapshot {
            snapshot: snapshot_from_proto(
                req.snapshot
                    .ok_or(DecodeError::MissingField("InstallSnapshot.snapshot"))?,
            )?,
        },
        Body::Heartbeat(req) => MessageBody::Heartbeat {
            leader_commit: Index::new(req.leader_commit),
            read_context: req.read_context.map(read_context_from_proto),
        },
        Body::HeartbeatResponse(resp) => MessageBody::HeartbeatResponse {
            read_context: resp.read_context.map(read_context_from_proto),
        },
        Body::ReadIndex(req) => MessageBody::ReadIndex {
            read_context: required_read_context(req.read_context, "ReadIndex.read_context")?,
        },
        Body::ReadIndexResponse(resp) => MessageBody::ReadIndexResponse {
            read_context: required_read_context(resp.read_context, "ReadIndexResponse.read_context")?,
            read_index: Index::new(resp.read_index),
        },
    };

    Ok(Message {
        from: ReplicaId::new(proto.from),
        to: ReplicaId::new(proto.to),
        term: Term::new(proto.term),
        body,
    })
}
