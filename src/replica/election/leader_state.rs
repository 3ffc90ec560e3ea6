use crate::commitlog::Index;
use crate::replica::election::{JointConfig, VoteResult};
use crate::replica::peers::ReplicaId;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

/// Leader's view of every member's log, including its own.
pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<ReplicaId, PeerState>,
    max_inflight: usize,
}

impl LeaderStateTracker {
    pub(crate) fn new(members: &BTreeSet<ReplicaId>, last_index: Index, max_inflight: usize) -> Self {
        let mut tracker = LeaderStateTracker {
            peer_state: HashMap::with_capacity(members.len()),
            max_inflight,
        };
        tracker.set_members(members, last_index);
        tracker
    }

    /// Adds newly joined members (probing from the end of our log) and forgets removed ones.
    pub(crate) fn set_members(&mut self, members: &BTreeSet<ReplicaId>, last_index: Index) {
        self.peer_state.retain(|id, _| members.contains(id));
        for id in members {
            if !self.peer_state.contains_key(id) {
                self.peer_state
                    .insert(id.clone(), PeerState::new(last_index.plus(1), self.max_inflight));
            }
        }
    }

    pub(crate) fn peer_state(&self, peer_id: &ReplicaId) -> Option<&PeerState> {
        self.peer_state.get(peer_id)
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &ReplicaId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    pub(crate) fn peer_ids(&self) -> Vec<ReplicaId> {
        let mut ids: Vec<_> = self.peer_state.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn peers_iter(&self) -> impl Iterator<Item = (&ReplicaId, &PeerState)> {
        self.peer_state.iter()
    }

    /// Highest index replicated on a quorum of voters (both halves of a joint config).
    pub(crate) fn committed_index(&self, voters: &JointConfig) -> Index {
        voters.committed_index(|id| self.peer_state.get(id).map(|pr| pr.matched).unwrap_or_default())
    }

    /// True if a quorum of voters has been heard from since the last check. Resets the activity
    /// flags of everyone except `my_id` for the next check.
    pub(crate) fn quorum_active(&mut self, voters: &JointConfig, my_id: &ReplicaId) -> bool {
        let mut votes = HashMap::with_capacity(self.peer_state.len());
        for (id, pr) in self.peer_state.iter_mut() {
            if id == my_id {
                votes.insert(id.clone(), true);
                continue;
            }
            votes.insert(id.clone(), pr.recent_active);
            pr.recent_active = false;
        }

        voters.vote_result(&votes) == VoteResult::Won
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ReplicationMode {
    /// Peer's log position is unknown. At most one append in flight until we hear back.
    Probe,
    /// Peer is caught up. Appends are pipelined, bounded by the inflight window.
    Replicate,
    /// Peer needs a snapshot at `pending` before it can accept appends again.
    Snapshot { pending: Index },
}

pub(crate) struct PeerState {
    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Index,

    mode: ReplicationMode,
    probe_sent: bool,
    // Last index of each append that's in flight, oldest first.
    inflight: VecDeque<Index>,
    max_inflight: usize,

    // Set on any message from the peer. Cleared by the leader's periodic quorum check.
    recent_active: bool,
}

impl PeerState {
    fn new(next: Index, max_inflight: usize) -> Self {
        PeerState {
            next,
            matched: Index::zero(),
            mode: ReplicationMode::Probe,
            probe_sent: false,
            inflight: VecDeque::new(),
            max_inflight,
            recent_active: true,
        }
    }

    pub(crate) fn next(&self) -> Index {
        self.next
    }

    pub(crate) fn matched(&self) -> Index {
        self.matched
    }

    pub(crate) fn mode(&self) -> ReplicationMode {
        self.mode
    }

    pub(crate) fn mark_active(&mut self) {
        self.recent_active = true;
    }

    /// Records that the peer's log matches ours up to `index`. Returns true if `matched` moved.
    pub(crate) fn maybe_update(&mut self, index: Index) -> bool {
        let updated = self.matched < index;
        if updated {
            self.matched = index;
            self.probe_sent = false;
        }
        if self.next < index.plus(1) {
            self.next = index.plus(1);
        }
        updated
    }

    /// Handles a rejected append of `rejected` (its prev index). `match_hint` is the peer's best
    /// guess at where our logs agree. Returns false if the rejection is stale.
    pub(crate) fn maybe_decr_to(&mut self, rejected: Index, match_hint: Index) -> bool {
        if let ReplicationMode::Replicate = self.mode {
            if rejected <= self.matched {
                return false;
            }
            self.next = self.matched.plus(1);
            return true;
        }

        // In probe mode only the latest probe's rejection counts.
        if self.next.minus(1) != rejected {
            return false;
        }

        let candidate = std::cmp::min(rejected, match_hint.plus(1));
        self.next = std::cmp::max(candidate, self.matched.plus(1));
        self.probe_sent = false;
        true
    }

    pub(crate) fn become_probe(&mut self) {
        self.next = match self.mode {
            ReplicationMode::Snapshot { pending } => std::cmp::max(self.matched.plus(1), pending.plus(1)),
            _ => self.matched.plus(1),
        };
        self.mode = ReplicationMode::Probe;
        self.probe_sent = false;
        self.inflight.clear();
    }

    pub(crate) fn become_replicate(&mut self) {
        self.mode = ReplicationMode::Replicate;
        self.next = self.matched.plus(1);
        self.probe_sent = false;
        self.inflight.clear();
    }

    pub(crate) fn become_snapshot(&mut self, snapshot_index: Index) {
        self.mode = ReplicationMode::Snapshot {
            pending: snapshot_index,
        };
        self.probe_sent = false;
        self.inflight.clear();
    }

    /// Aborts a snapshot transfer. The peer is probed again from its last known match.
    pub(crate) fn snapshot_failure(&mut self) {
        if let ReplicationMode::Snapshot { .. } = self.mode {
            self.mode = ReplicationMode::Snapshot {
                pending: Index::zero(),
            };
            self.become_probe();
        }
    }

    /// True once the peer has caught up to (or past) the snapshot it was sent.
    pub(crate) fn snapshot_done(&self) -> bool {
        match self.mode {
            ReplicationMode::Snapshot { pending } => self.matched >= pending,
            _ => false,
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        match self.mode {
            ReplicationMode::Probe => self.probe_sent,
            ReplicationMode::Replicate => self.inflight.len() >= self.max_inflight,
            ReplicationMode::Snapshot { .. } => true,
        }
    }

    /// Records an append that was just sent. `last_index` is None for an append with no entries.
    pub(crate) fn sent_entries(&mut self, last_index: Option<Index>) {
        match self.mode {
            ReplicationMode::Replicate => {
                if let Some(last) = last_index {
                    self.next = last.plus(1);
                    self.inflight.push_back(last);
                }
            }
            ReplicationMode::Probe => self.probe_sent = true,
            ReplicationMode::Snapshot { .. } => {}
        }
    }

    /// Frees the inflight window up to `index`, as acknowledged by the peer.
    pub(crate) fn free_inflight_to(&mut self, index: Index) {
        while let Some(front) = self.inflight.front() {
            if *front > index {
                break;
            }
            self.inflight.pop_front();
        }
    }

    /// A heartbeat response proves the peer is reachable: unblock a probe, and make room for one
    /// more append if the window is full.
    pub(crate) fn heartbeat_acked(&mut self) {
        self.probe_sent = false;
        if self.mode == ReplicationMode::Replicate && self.inflight.len() >= self.max_inflight {
            self.inflight.pop_front();
        }
    }
}

impl fmt::Debug for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}(next={:?}, matched={:?}, inflight={})",
            self.mode,
            self.next,
            self.matched,
            self.inflight.len()
        )
    }
}
