mod election_state;
mod leader_state;
mod quorum;
mod state_change_listener;

pub(crate) use election_state::CandidateState;
pub(crate) use election_state::ElectionState;
pub(crate) use election_state::FollowerState;
pub(crate) use election_state::LeaderState;
pub(crate) use leader_state::LeaderStateTracker;
pub(crate) use leader_state::PeerState;
pub(crate) use leader_state::ReplicationMode;
pub(crate) use quorum::JointConfig;
pub(crate) use quorum::VoteResult;
pub(crate) use state_change_listener::new as election_state_channel;
pub(crate) use state_change_listener::ElectionStateChangeNotifier;
pub use state_change_listener::ElectionStateChangeListener;
