use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::log_entry::{LogEntry, Snapshot};
use crate::replica::peers::ReplicaId;

/// Message is the unit of the peer protocol. Every message is one-way; a "response" is just a
/// message flowing the other way, matched up by its content (indexes and terms), never by the
/// transport. Duplicated or reordered delivery is therefore harmless.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub from: ReplicaId,
    pub to: ReplicaId,
    pub term: Term,
    pub body: MessageBody,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    RequestVote {
        last_log_index: Index,
        last_log_term: Term,
    },
    RequestVoteResponse {
        vote_granted: bool,
    },
    AppendEntries {
        prev_log_index: Index,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: Index,
    },
    AppendEntriesResponse {
        success: bool,
        /// On success, the highest index known to match the leader. On rejection, the
        /// `prev_log_index` that failed the consistency check.
        index: Index,
        /// On rejection, where the leader should probe next.
        reject_hint: Index,
        /// On rejection, the term of our entry at `reject_hint`.
        hint_term: Term,
    },
    InstallSnapshot {
        snapshot: Snapshot,
    },
    Heartbeat {
        leader_commit: Index,
        read_context: Option<ReadContext>,
    },
    HeartbeatResponse {
        read_context: Option<ReadContext>,
    },
    /// Follower forwarding a linearizable read to the leader.
    ReadIndex {
        read_context: ReadContext,
    },
    ReadIndexResponse {
        read_context: ReadContext,
        read_index: Index,
    },
}

impl MessageBody {
    pub fn name(&self) -> &'static str {
        match self {
            MessageBody::RequestVote { .. } => "RequestVote",
            MessageBody::RequestVoteResponse { .. } => "RequestVoteResponse",
            MessageBody::AppendEntries { .. } => "AppendEntries",
            MessageBody::AppendEntriesResponse { .. } => "AppendEntriesResponse",
            MessageBody::InstallSnapshot { .. } => "InstallSnapshot",
            MessageBody::Heartbeat { .. } => "Heartbeat",
            MessageBody::HeartbeatResponse { .. } => "HeartbeatResponse",
            MessageBody::ReadIndex { .. } => "ReadIndex",
            MessageBody::ReadIndexResponse { .. } => "ReadIndexResponse",
        }
    }

    /// Messages that only a current leader sends.
    pub(crate) fn is_from_leader(&self) -> bool {
        match self {
            MessageBody::AppendEntries { .. } | MessageBody::InstallSnapshot { .. } | MessageBody::Heartbeat { .. } => {
                true
            }
            _ => false,
        }
    }
}

/// Identifies one linearizable read request across the cluster.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReadContext {
    pub origin: ReplicaId,
    pub id: u64,
}
