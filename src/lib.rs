//! coordkv is a replicated key-value store built on Raft.
//!
//! A `Replica` is a pure state machine: it is fed ticks, client requests and peer messages, and
//! hands back `ReadyBatch`es of work to persist, send and apply. `try_create_raft_client` wires
//! one up with a write-ahead log, snapshots, a transport (gRPC between processes, or a
//! `LocalNetwork` within one) and any `StateMachine`, such as `KvStore`.

mod actor;
mod api;
mod apply;
mod commitlog;
mod kv;
mod replica;
mod server;
mod snapshot;
mod transport;
mod grpc {
    include!("../generated/raft.rs");
}

pub use api::try_create_raft_client;
pub use api::EnqueueEntryError;
pub use api::EnqueueEntryInput;
pub use api::PendingProposal;
pub use api::ProposeEntryError;
pub use api::RaftClient;
pub use api::RaftClientConfig;
pub use api::RaftClientCreationError;
pub use api::RaftElectionEvent;
pub use api::RaftElectionState;
pub use api::RaftEntryId;
pub use api::RaftEvent;
pub use api::RaftEventListener;
pub use api::RaftLeaderInfo;
pub use api::RaftMemberInfo;
pub use api::RaftMemberInfoBlob;
pub use api::RaftMembershipChange;
pub use api::RaftOptions;
pub use api::RaftTransportConfig;
pub use api::ReadIndexError;
pub use api::ReadIndexToken;
pub use api::ReplicaExited;
pub use api::ReplicatedLog;
pub use apply::ProposalError;
pub use apply::StateMachine;
pub use apply::StateMachineError;
pub use apply::StateMachineOutput;
pub use commitlog::Index;
pub use kv::KvCommand;
pub use kv::KvReader;
pub use kv::KvStore;
pub use replica::ConfChange;
pub use replica::ConfChangeError;
pub use replica::ConfChangeKind;
pub use replica::ConfChangeSingle;
pub use replica::ConfigState;
pub use replica::EntryKind;
pub use replica::HardState;
pub use replica::LogEntry;
pub use replica::Message;
pub use replica::MessageBody;
pub use replica::NoLeader;
pub use replica::PeerProgress;
pub use replica::ProposeError;
pub use replica::ReadContext;
pub use replica::ReadState;
pub use replica::ReadyAck;
pub use replica::ReadyBatch;
pub use replica::RecoveredState;
pub use replica::Replica;
pub use replica::ReplicaConfig;
pub use replica::ReplicaId;
pub use replica::ReplicaStatus;
pub use replica::Role;
pub use replica::Snapshot;
pub use replica::SnapshotMetadata;
pub use replica::SoftState;
pub use replica::Term;
pub use transport::LocalNetwork;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
