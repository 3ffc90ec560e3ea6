use crate::commitlog::Index;
use crate::replica::local_state::{HardState, Term};
use crate::replica::log_entry::{LogEntry, Snapshot};
use crate::replica::message::{Message, ReadContext};
use crate::replica::peers::ReplicaId;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Volatile state that is interesting to observers but never persisted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SoftState {
    pub role: Role,
    pub term: Term,
    pub leader: Option<ReplicaId>,
}

/// A completed ReadIndex round: once the local state machine has applied `index`, a local read
/// is linearizable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadState {
    pub index: Index,
    pub read_context: ReadContext,
}

/// ReadyBatch is one unit of work handed from the replica to its drivers. It must be consumed in
/// this order:
///
/// 1. persist `snapshot` (if any), `entries` and `hard_state`
/// 2. send `messages`
/// 3. apply `snapshot` then `committed_entries` to the state machine
/// 4. call `Replica::advance()` with the batch's `ack()`
///
/// The replica won't produce another batch until step 4.
#[derive(Debug, Default)]
pub struct ReadyBatch {
    pub soft_state: Option<SoftState>,
    pub hard_state: Option<HardState>,
    pub snapshot: Option<Snapshot>,
    pub entries: Vec<LogEntry>,
    pub committed_entries: Vec<LogEntry>,
    pub messages: Vec<Message>,
    pub read_states: Vec<ReadState>,
}

impl ReadyBatch {
    pub fn ack(&self) -> ReadyAck {
        ReadyAck {
            last_persisted: self.entries.last().map(|e| (e.index, e.term)),
            installed_snapshot: self.snapshot.as_ref().map(|s| s.index()),
        }
    }

    /// True if the batch carries anything that must be durable before `messages` go out.
    pub fn must_sync(&self) -> bool {
        self.hard_state.is_some() || !self.entries.is_empty() || self.snapshot.is_some()
    }
}

/// What the driver reports back to the replica once a `ReadyBatch` is fully consumed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadyAck {
    pub last_persisted: Option<(Index, Term)>,
    pub installed_snapshot: Option<Index>,
}
