//! This mod is meant to hold most of the code for the library's client-facing API.
mod client;
mod event_bus;
mod options;
mod replicated_log;
mod types;
mod wiring;

pub use client::RaftClient;
pub use event_bus::RaftElectionEvent;
pub use event_bus::RaftElectionState;
pub use event_bus::RaftEvent;
pub use event_bus::RaftEventListener;
pub use options::RaftOptions;
pub use replicated_log::EnqueueEntryError;
pub use replicated_log::EnqueueEntryInput;
pub use replicated_log::PendingProposal;
pub use replicated_log::ProposeEntryError;
pub use replicated_log::ReadIndexError;
pub use replicated_log::ReadIndexToken;
pub use replicated_log::ReplicaExited;
pub use replicated_log::ReplicatedLog;
pub use types::RaftEntryId;
pub use types::RaftLeaderInfo;
pub use types::RaftMemberInfo;
pub use types::RaftMemberInfoBlob;
pub use types::RaftMembershipChange;
pub use wiring::try_create_raft_client;
pub use wiring::RaftClientConfig;
pub use wiring::RaftClientCreationError;
pub use wiring::RaftTransportConfig;
