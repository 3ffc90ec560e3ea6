use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::membership::ConfigState;
use bytes::Bytes;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// Opaque application payload. An empty payload is the no-op a new leader appends.
    Normal,
    /// Payload is an encoded `ConfChange`.
    ConfChange,
}

/// One unit of replicated history. Entries are immutable once created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    pub term: Term,
    pub index: Index,
    pub kind: EntryKind,
    pub data: Bytes,
}

impl LogEntry {
    pub fn new_normal(term: Term, index: Index, data: Bytes) -> Self {
        LogEntry {
            term,
            index,
            kind: EntryKind::Normal,
            data,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SnapshotMetadata {
    pub index: Index,
    pub term: Term,
    pub config_state: ConfigState,
}

/// A point-in-time image of the state machine, covering every entry up to and including
/// `metadata.index`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub data: Bytes,
}

impl Snapshot {
    pub fn index(&self) -> Index {
        self.metadata.index
    }

    pub fn term(&self) -> Term {
        self.metadata.term
    }
}
