mod election;
mod local_state;
mod log_entry;
mod membership;
mod message;
mod peers;
mod raft_log;
mod read_only;
mod ready;
mod replica;
mod wire;

pub use election::ElectionStateChangeListener;
pub use local_state::HardState;
pub use local_state::Term;
pub use log_entry::EntryKind;
pub use log_entry::LogEntry;
pub use log_entry::Snapshot;
pub use log_entry::SnapshotMetadata;
pub use membership::ConfChange;
pub use membership::ConfChangeError;
pub use membership::ConfChangeKind;
pub use membership::ConfChangeSingle;
pub use membership::ConfigState;
pub use message::Message;
pub use message::MessageBody;
pub use message::ReadContext;
pub use peers::ReplicaId;
pub use ready::ReadState;
pub use ready::ReadyAck;
pub use ready::ReadyBatch;
pub use ready::Role;
pub use ready::SoftState;
pub use replica::NoLeader;
pub use replica::PeerProgress;
pub use replica::ProposeError;
pub use replica::RecoveredState;
pub use replica::Replica;
pub use replica::ReplicaConfig;
pub use replica::ReplicaStatus;
pub use wire::DecodeError;

pub(crate) use election::election_state_channel;
pub(crate) use election::ElectionStateChangeNotifier;
pub(crate) use wire::{
    config_state_from_proto, config_state_to_proto, decode_conf_change, encode_conf_change, encode_to_vec,
    entry_from_proto, entry_to_proto, hard_state_from_proto, hard_state_to_proto, message_from_proto,
    message_to_proto, snapshot_from_proto, snapshot_to_proto,
};
