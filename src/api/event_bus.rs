use crate::replica::{ElectionStateChangeListener, Role, SoftState};

/// An event that happened, as observed by the local raft replica.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RaftEvent {
    /// An event of leader election or timeout. Consuming this event type is subtle. It doesn't queue
    /// intermediate events. If there are multiple events between when application awaits the next event,
    /// those events will be clobbered into only the most recent event.
    Election(RaftElectionEvent),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftElectionEvent {
    pub term: u64,
    pub state: RaftElectionState,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RaftElectionState {
    Leader,
    Candidate,
    Follower { leader_replica_id: String },
    FollowerNoLeader,
}

#[derive(Clone)]
pub struct RaftEventListener {
    election_state_change_listener: ElectionStateChangeListener,
}

impl RaftEventListener {
    pub(crate) fn new(election_state_change_listener: ElectionStateChangeListener) -> Self {
        RaftEventListener {
            election_state_change_listener,
        }
    }

    /// `next_event()` returns the next event that this local raft replica observes, or None once
    /// the replica has shut down.
    pub async fn next_event(&mut self) -> Option<RaftEvent> {
        self.election_state_change_listener
            .next()
            .await
            .map(|soft_state| RaftEvent::Election(RaftElectionEvent::from(soft_state)))
    }

    /// The most recent election state, without waiting.
    pub fn current_election_state(&self) -> RaftElectionEvent {
        RaftElectionEvent::from(self.election_state_change_listener.current())
    }
}

// ------- Conversions --------

impl From<SoftState> for RaftElectionEvent {
    fn from(soft_state: SoftState) -> Self {
        let state = match (soft_state.role, soft_state.leader) {
            (Role::Leader, _) => RaftElectionState::Leader,
            (Role::Candidate, _) => RaftElectionState::Candidate,
            (Role::Follower, Some(leader)) => RaftElectionState::Follower {
                leader_replica_id: leader.into_inner(),
            },
            (Role::Follower, None) => RaftElectionState::FollowerNoLeader,
        };

        RaftElectionEvent {
            term: soft_state.term.as_u64(),
            state,
        }
    }
}
