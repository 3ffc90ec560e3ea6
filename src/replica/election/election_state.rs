use crate::replica::election::LeaderStateTracker;
use crate::replica::message::ReadContext;
use crate::replica::peers::ReplicaId;
use crate::replica::read_only::ReadOnly;
use crate::replica::ready::Role;
use std::collections::HashMap;
use std::fmt;

/// ElectionState holds what is specific to the replica's current role. It only stores state;
/// deciding when to move between roles is the replica's job.
pub(crate) enum ElectionState {
    Leader(LeaderState),
    Candidate(CandidateState),
    Follower(FollowerState),
}

pub(crate) struct LeaderState {
    pub(crate) tracker: LeaderStateTracker,
    pub(crate) read_only: ReadOnly,
    // Reads that arrived before this leader committed an entry from its own term. Until then
    // the commit index may be stale.
    pub(crate) reads_awaiting_commit: Vec<ReadContext>,
}

#[derive(Default)]
pub(crate) struct CandidateState {
    pub(crate) votes: HashMap<ReplicaId, bool>,
}

#[derive(Default)]
pub(crate) struct FollowerState {
    pub(crate) leader: Option<ReplicaId>,
}

impl ElectionState {
    pub(crate) fn new_follower(leader: Option<ReplicaId>) -> Self {
        ElectionState::Follower(FollowerState { leader })
    }

    pub(crate) fn role(&self) -> Role {
        match self {
            ElectionState::Leader(_) => Role::Leader,
            ElectionState::Candidate(_) => Role::Candidate,
            ElectionState::Follower(_) => Role::Follower,
        }
    }

    /// Leader as known to this replica. `my_id` is returned if we are leader.
    pub(crate) fn leader(&self, my_id: &ReplicaId) -> Option<ReplicaId> {
        match self {
            ElectionState::Leader(_) => Some(my_id.clone()),
            ElectionState::Candidate(_) => None,
            ElectionState::Follower(fs) => fs.leader.clone(),
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderState> {
        if let ElectionState::Leader(ls) = self {
            Some(ls)
        } else {
            None
        }
    }

    pub(crate) fn leader_state(&self) -> Option<&LeaderState> {
        if let ElectionState::Leader(ls) = self {
            Some(ls)
        } else {
            None
        }
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Leader(_) => write!(f, "Leader"),
            ElectionState::Candidate(_) => write!(f, "Candidate"),
            ElectionState::Follower(FollowerState { leader: Some(leader) }) => {
                write!(f, "Follower(Leader={:?})", leader)
            }
            ElectionState::Follower(FollowerState { leader: None }) => write!(f, "Follower(Leader=None)"),
        }
    }
}
