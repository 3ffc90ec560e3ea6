use crate::commitlog::Index;
use crate::replica::election::{
    CandidateState, ElectionState, FollowerState, LeaderState, LeaderStateTracker, ReplicationMode, VoteResult,
};
use crate::replica::local_state::{HardState, LocalState, Term};
use crate::replica::log_entry::{EntryKind, LogEntry, Snapshot};
use crate::replica::membership::{ConfChange, ConfChangeError, ConfigState};
use crate::replica::message::{Message, MessageBody, ReadContext};
use crate::replica::peers::ReplicaId;
use crate::replica::raft_log::RaftLog;
use crate::replica::read_only::ReadOnly;
use crate::replica::ready::{ReadState, ReadyAck, ReadyBatch, Role, SoftState};
use crate::replica::wire;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::{cmp, mem};

// Bounds the number of committed entries handed out in a single ready batch.
const MAX_COMMITTED_ENTRIES_PER_READY: usize = 1024;

pub struct ReplicaConfig {
    pub logger: slog::Logger,
    pub my_replica_id: ReplicaId,
    pub heartbeat_ticks: u32,
    pub election_ticks: u32,
    pub check_quorum: bool,
    pub max_entries_per_append: usize,
    pub max_inflight_appends: usize,
    /// Entries kept behind a snapshot when compacting, so slow followers can catch up from the
    /// log instead of needing the snapshot.
    pub snapshot_catchup_entries: u64,
    /// Seed for election timeout jitter. Random if None.
    pub rng_seed: Option<u64>,
}

/// Everything a replica restarts from: the newest snapshot, the durable log after it, and the
/// last hard state.
#[derive(Default)]
pub struct RecoveredState {
    pub hard_state: HardState,
    pub snapshot: Option<Snapshot>,
    pub entries: Vec<LogEntry>,
    /// Membership to start with when there's no snapshot, i.e. the bootstrap cluster.
    pub initial_config: ConfigState,
}

#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum ProposeError {
    #[error("Not leader. Known leader: {leader:?}")]
    NotLeader { leader: Option<ReplicaId> },
    #[error("A membership change is already in progress")]
    ConfChangeInProgress,
    #[error("Invalid membership change: {0}")]
    InvalidConfChange(#[from] ConfChangeError),
}

#[derive(Copy, Clone, Debug, thiserror::Error, Eq, PartialEq)]
#[error("No known leader")]
pub struct NoLeader;

#[derive(Clone, Debug)]
pub struct ReplicaStatus {
    pub id: ReplicaId,
    pub soft_state: SoftState,
    pub hard_state: HardState,
    pub applied: Index,
    pub last_index: Index,
    pub config_state: ConfigState,
    /// Only populated on the leader.
    pub progress: Vec<PeerProgress>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerProgress {
    pub replica_id: ReplicaId,
    pub matched: Index,
    pub next: Index,
    pub paused: bool,
}

/// Replica is the raft state machine. It does no I/O and has no notion of time: it is driven by
/// `tick()`, `step()` and proposals, and hands all of its output back through `ready()`.
pub struct Replica {
    logger: slog::Logger,
    my_replica_id: ReplicaId,

    local_state: LocalState,
    election_state: ElectionState,
    raft_log: RaftLog,
    membership: ConfigState,
    // Index of the last conf change entry this leader appended. A new one can only be proposed
    // once it has been applied.
    pending_conf_index: Index,
    // Newest snapshot available to send to lagging peers.
    latest_snapshot: Option<Snapshot>,

    heartbeat_ticks: u32,
    election_ticks: u32,
    check_quorum: bool,
    max_entries_per_append: usize,
    max_inflight_appends: usize,
    snapshot_catchup_entries: u64,

    heartbeat_elapsed: u32,
    election_elapsed: u32,
    randomized_election_timeout: u32,
    rng: StdRng,

    msgs: Vec<Message>,
    read_states: Vec<ReadState>,
    prev_soft_state: SoftState,
    prev_hard_state: HardState,
    ready_outstanding: bool,
}

impl Replica {
    pub fn new(config: ReplicaConfig, recovered: RecoveredState) -> Self {
        assert!(
            config.election_ticks > config.heartbeat_ticks,
            "Election ticks must be greater than heartbeat ticks"
        );
        let RecoveredState {
            hard_state,
            snapshot,
            entries,
            initial_config,
        } = recovered;

        let (prev_index, prev_term, membership) = match &snapshot {
            Some(s) => (s.index(), s.term(), s.metadata.config_state.clone()),
            None => (Index::zero(), Term::default(), initial_config),
        };
        // Everything after the snapshot is replayed through the apply pipeline again, so applied
        // restarts at the snapshot.
        let raft_log = RaftLog::new(
            config.logger.clone(),
            prev_index,
            prev_term,
            entries,
            hard_state.commit,
            prev_index,
        );
        let local_state = LocalState::new(
            config.my_replica_id.clone(),
            hard_state.term,
            hard_state.voted_for.clone(),
        );
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let prev_soft_state = SoftState {
            role: Role::Follower,
            term: hard_state.term,
            leader: None,
        };
        let mut replica = Replica {
            logger: config.logger,
            my_replica_id: config.my_replica_id,
            local_state,
            election_state: ElectionState::new_follower(None),
            raft_log,
            membership,
            pending_conf_index: Index::zero(),
            latest_snapshot: snapshot,
            heartbeat_ticks: config.heartbeat_ticks,
            election_ticks: config.election_ticks,
            check_quorum: config.check_quorum,
            max_entries_per_append: cmp::max(config.max_entries_per_append, 1),
            max_inflight_appends: cmp::max(config.max_inflight_appends, 1),
            snapshot_catchup_entries: config.snapshot_catchup_entries,
            heartbeat_elapsed: 0,
            election_elapsed: 0,
            randomized_election_timeout: config.election_ticks,
            rng,
            msgs: Vec::new(),
            read_states: Vec::new(),
            prev_soft_state,
            prev_hard_state: hard_state,
            ready_outstanding: false,
        };
        replica.reset_randomized_election_timeout();

        slog::info!(
            replica.logger,
            "Created replica. Term: {:?}, commit: {:?}, last index: {:?}, config: {:?}",
            replica.local_state.current_term(),
            replica.raft_log.committed(),
            replica.raft_log.last_index(),
            replica.membership
        );

        replica
    }

    pub fn my_replica_id(&self) -> &ReplicaId {
        &self.my_replica_id
    }

    pub fn soft_state(&self) -> SoftState {
        SoftState {
            role: self.election_state.role(),
            term: self.local_state.current_term(),
            leader: self.election_state.leader(&self.my_replica_id),
        }
    }

    pub fn config_state(&self) -> &ConfigState {
        &self.membership
    }

    pub fn status(&self) -> ReplicaStatus {
        let progress = match self.election_state.leader_state() {
            Some(ls) => {
                let mut progress: Vec<_> = ls
                    .tracker
                    .peers_iter()
                    .map(|(id, pr)| PeerProgress {
                        replica_id: id.clone(),
                        matched: pr.matched(),
                        next: pr.next(),
                        paused: pr.is_paused(),
                    })
                    .collect();
                progress.sort_by(|a, b| a.replica_id.cmp(&b.replica_id));
                progress
            }
            None => Vec::new(),
        };

        ReplicaStatus {
            id: self.my_replica_id.clone(),
            soft_state: self.soft_state(),
            hard_state: self.local_state.hard_state(self.raft_log.committed()),
            applied: self.raft_log.applied(),
            last_index: self.raft_log.last_index(),
            config_state: self.membership.clone(),
            progress,
        }
    }

    // ------- Proposals -------

    /// Appends `data` to the log if we're leader. Returns where the entry landed; it is only
    /// committed if an entry at that index with that term is later applied.
    pub fn propose(&mut self, data: Bytes) -> Result<(Index, Term), ProposeError> {
        self.check_leader()?;

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        let appended = self.append_entry(EntryKind::Normal, data);
        self.bcast_append();

        Ok(appended)
    }

    pub fn propose_conf_change(&mut self, change: ConfChange) -> Result<(Index, Term), ProposeError> {
        self.check_leader()?;

        if self.pending_conf_index > self.raft_log.applied() {
            slog::info!(
                self.logger,
                "Rejecting conf change. Pending change at {:?} not applied yet (applied={:?})",
                self.pending_conf_index,
                self.raft_log.applied()
            );
            return Err(ProposeError::ConfChangeInProgress);
        }
        // Validate against current config. It's applied for real once committed.
        self.membership.apply(&change)?;

        let appended = self.append_conf_change(&change);
        self.bcast_append();

        Ok(appended)
    }

    fn check_leader(&self) -> Result<(), ProposeError> {
        match self.election_state {
            ElectionState::Leader(_) => Ok(()),
            _ => Err(ProposeError::NotLeader {
                leader: self.election_state.leader(&self.my_replica_id),
            }),
        }
    }

    fn append_conf_change(&mut self, change: &ConfChange) -> (Index, Term) {
        let appended = self.append_entry(EntryKind::ConfChange, wire::encode_conf_change(change));
        self.pending_conf_index = appended.0;
        slog::info!(self.logger, "Appended conf change {:?} at {:?}", change, appended.0);
        appended
    }

    fn append_entry(&mut self, kind: EntryKind, data: Bytes) -> (Index, Term) {
        let term = self.local_state.current_term();
        let index = self.raft_log.last_index().plus(1);
        self.raft_log.append(vec![LogEntry { term, index, kind, data }]);
        (index, term)
    }

    // ------- Time -------

    pub fn tick(&mut self) {
        match self.election_state {
            ElectionState::Leader(_) => self.tick_heartbeat(),
            _ => self.tick_election(),
        }
    }

    fn tick_election(&mut self) {
        self.election_elapsed += 1;
        if self.promotable() && self.election_elapsed >= self.randomized_election_timeout {
            self.election_elapsed = 0;
            slog::info!(
                self.logger,
                "Election timeout elapsed at term {:?}. Starting election.",
                self.local_state.current_term()
            );
            self.campaign();
        }
    }

    fn tick_heartbeat(&mut self) {
        self.heartbeat_elapsed += 1;
        self.election_elapsed += 1;

        if self.election_elapsed >= self.election_ticks {
            self.election_elapsed = 0;
            if self.check_quorum {
                let voters = self.membership.joint_config();
                let active = match self.election_state.leader_state_mut() {
                    Some(ls) => ls.tracker.quorum_active(&voters, &self.my_replica_id),
                    None => true,
                };
                if !active {
                    slog::warn!(self.logger, "Lost contact with a quorum of voters. Stepping down.");
                    let term = self.local_state.current_term();
                    self.become_follower(term, None);
                    return;
                }
            }
        }

        if self.heartbeat_elapsed >= self.heartbeat_ticks {
            self.heartbeat_elapsed = 0;
            self.bcast_heartbeat();
        }
    }

    fn promotable(&self) -> bool {
        self.membership.is_voter(&self.my_replica_id)
    }

    fn reset_randomized_election_timeout(&mut self) {
        self.randomized_election_timeout = self.election_ticks + self.rng.gen_range(0..self.election_ticks);
    }

    fn reset_timers(&mut self) {
        self.election_elapsed = 0;
        self.heartbeat_elapsed = 0;
        self.reset_randomized_election_timeout();
    }

    // ------- Role transitions -------

    /// Starts an election now, regardless of the election timer.
    pub fn campaign(&mut self) {
        if !self.promotable() {
            slog::warn!(self.logger, "Not a voter. Ignoring request to campaign.");
            return;
        }
        if let ElectionState::Leader(_) = self.election_state {
            return;
        }

        // > On conversion to candidate, start election:
        // > * Increment currentTerm
        // > * Vote for self
        // > * Reset election timer
        // > * Send RequestVote RPCs to all other servers
        let term = self.local_state.increment_term_and_vote_for_self();
        let mut candidate = CandidateState::default();
        candidate.votes.insert(self.my_replica_id.clone(), true);
        self.election_state = ElectionState::Candidate(candidate);
        self.reset_timers();
        slog::info!(self.logger, "Became candidate at term {:?}", term);

        if self.poll_votes() == VoteResult::Won {
            self.become_leader();
            return;
        }

        let last_log_index = self.raft_log.last_index();
        let last_log_term = self.raft_log.last_term();
        for voter in self.membership.joint_config().ids() {
            if voter == self.my_replica_id {
                continue;
            }
            self.send(
                voter,
                MessageBody::RequestVote {
                    last_log_index,
                    last_log_term,
                },
            );
        }
    }

    fn poll_votes(&self) -> VoteResult {
        match &self.election_state {
            ElectionState::Candidate(cs) => self.membership.joint_config().vote_result(&cs.votes),
            _ => VoteResult::Pending,
        }
    }

    fn become_follower(&mut self, term: Term, leader: Option<ReplicaId>) {
        self.local_state.store_term_if_increased(term);
        self.election_state = ElectionState::Follower(FollowerState { leader });
        self.reset_timers();
        slog::info!(
            self.logger,
            "Became follower at term {:?}. Election state: {:?}",
            self.local_state.current_term(),
            self.election_state
        );
    }

    fn become_leader(&mut self) {
        let last_index = self.raft_log.last_index();
        let mut tracker = LeaderStateTracker::new(&self.membership.members(), last_index, self.max_inflight_appends);
        if let Some(me) = tracker.peer_state_mut(&self.my_replica_id) {
            me.maybe_update(self.raft_log.stable_to_index());
            me.become_replicate();
        }
        self.election_state = ElectionState::Leader(LeaderState {
            tracker,
            read_only: ReadOnly::default(),
            reads_awaiting_commit: Vec::new(),
        });
        self.reset_timers();
        slog::info!(
            self.logger,
            "Became leader at term {:?}",
            self.local_state.current_term()
        );

        // Committing an entry from our own term also commits everything before it (§5.4.2).
        let (noop_index, _) = self.append_entry(EntryKind::Normal, Bytes::new());
        // Any conf change in the log we inherited must be applied before accepting a new one.
        self.pending_conf_index = noop_index;
        self.bcast_append();
    }

    // ------- Messages -------

    pub fn step(&mut self, msg: Message) {
        if msg.to != self.my_replica_id {
            slog::debug!(self.logger, "Dropping message addressed to {:?}", msg.to);
            return;
        }

        let current_term = self.local_state.current_term();
        if msg.term > current_term {
            if let MessageBody::RequestVote { .. } = msg.body {
                if self.in_leader_lease() {
                    slog::info!(
                        self.logger,
                        "Ignoring RequestVote from {:?} at term {:?}: current leader lease hasn't expired",
                        msg.from,
                        msg.term
                    );
                    return;
                }
            }

            slog::info!(
                self.logger,
                "Observed higher term {:?} in {} from {:?} (current term {:?})",
                msg.term,
                msg.body.name(),
                msg.from,
                current_term
            );
            // > If RPC request or response contains term T > currentTerm:
            // > set currentTerm = T, convert to follower (§5.1)
            let leader = if msg.body.is_from_leader() {
                Some(msg.from.clone())
            } else {
                None
            };
            self.become_follower(msg.term, leader);
        } else if msg.term < current_term {
            match msg.body {
                MessageBody::AppendEntries { .. } | MessageBody::Heartbeat { .. } => {
                    // Our higher term makes a stale leader step down.
                    self.send(
                        msg.from,
                        MessageBody::AppendEntriesResponse {
                            success: false,
                            index: Index::zero(),
                            reject_hint: Index::zero(),
                            hint_term: Term::default(),
                        },
                    );
                }
                MessageBody::RequestVote { .. } => {
                    self.send(msg.from, MessageBody::RequestVoteResponse { vote_granted: false });
                }
                _ => {
                    slog::debug!(
                        self.logger,
                        "Dropping stale {} from {:?} at term {:?}",
                        msg.body.name(),
                        msg.from,
                        msg.term
                    );
                }
            }
            return;
        }

        let Message { from, body, .. } = msg;
        match body {
            MessageBody::RequestVote {
                last_log_index,
                last_log_term,
            } => self.handle_request_vote(from, last_log_index, last_log_term),
            MessageBody::RequestVoteResponse { vote_granted } => self.handle_vote_response(from, vote_granted),
            MessageBody::AppendEntries {
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => {
                if self.accept_leader(&from) {
                    self.handle_append_entries(from, prev_log_index, prev_log_term, entries, leader_commit);
                }
            }
            MessageBody::Heartbeat {
                leader_commit,
                read_context,
            } => {
                if self.accept_leader(&from) {
                    self.handle_heartbeat(from, leader_commit, read_context);
                }
            }
            MessageBody::InstallSnapshot { snapshot } => {
                if self.accept_leader(&from) {
                    self.handle_install_snapshot(from, snapshot);
                }
            }
            MessageBody::AppendEntriesResponse {
                success,
                index,
                reject_hint,
                hint_term,
            } => self.handle_append_response(from, success, index, reject_hint, hint_term),
            MessageBody::HeartbeatResponse { read_context } => self.handle_heartbeat_response(from, read_context),
            MessageBody::ReadIndex { read_context } => {
                if let ElectionState::Leader(_) = self.election_state {
                    self.leader_read_index(read_context);
                } else {
                    slog::debug!(self.logger, "Not leader. Dropping forwarded read from {:?}", from);
                }
            }
            MessageBody::ReadIndexResponse {
                read_context,
                read_index,
            } => {
                if read_context.origin == self.my_replica_id {
                    self.read_states.push(ReadState {
                        index: read_index,
                        read_context,
                    });
                }
            }
        }
    }

    /// True if we've heard from a live leader within the minimum election timeout.
    fn in_leader_lease(&self) -> bool {
        self.check_quorum
            && self.election_state.leader(&self.my_replica_id).is_some()
            && self.election_elapsed < self.election_ticks
    }

    /// Handles a leader message at our own term. Returns false if it must be dropped.
    fn accept_leader(&mut self, from: &ReplicaId) -> bool {
        match &mut self.election_state {
            ElectionState::Leader(_) => {
                slog::error!(
                    self.logger,
                    "Received leader message from {:?} at our own term as leader. Dropping.",
                    from
                );
                return false;
            }
            ElectionState::Candidate(_) => {
                // > If AppendEntries RPC received from new leader: convert to follower
                let term = self.local_state.current_term();
                self.become_follower(term, Some(from.clone()));
            }
            ElectionState::Follower(fs) => {
                if fs.leader.as_ref() != Some(from) {
                    fs.leader.replace(from.clone());
                    slog::info!(self.logger, "Discovered leader {:?}", from);
                }
            }
        }

        self.election_elapsed = 0;
        true
    }

    fn handle_request_vote(&mut self, candidate: ReplicaId, last_log_index: Index, last_log_term: Term) {
        // > If votedFor is null or candidateId, and candidate’s log is at
        // > least as up-to-date as receiver’s log, grant vote (§5.2, §5.4)
        let can_vote = match self.local_state.voted_for() {
            Some(voted_for) => *voted_for == candidate,
            None => self.election_state.leader(&self.my_replica_id).is_none(),
        };
        let up_to_date = self.raft_log.is_up_to_date(last_log_index, last_log_term);
        let vote_granted = can_vote && up_to_date && self.local_state.store_vote_if_unvoted(&candidate);

        if vote_granted {
            self.election_elapsed = 0;
            slog::info!(
                self.logger,
                "Voting for {:?} at term {:?}",
                candidate,
                self.local_state.current_term()
            );
        } else {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}. Voted for: {:?}, candidate log up to date: {}",
                candidate,
                self.local_state.voted_for(),
                up_to_date
            );
        }

        self.send(candidate, MessageBody::RequestVoteResponse { vote_granted });
    }

    fn handle_vote_response(&mut self, from: ReplicaId, vote_granted: bool) {
        match &mut self.election_state {
            ElectionState::Candidate(cs) => {
                cs.votes.entry(from).or_insert(vote_granted);
            }
            _ => return,
        }

        match self.poll_votes() {
            VoteResult::Won => self.become_leader(),
            VoteResult::Lost => {
                slog::info!(self.logger, "Lost election.");
                let term = self.local_state.current_term();
                self.become_follower(term, None);
            }
            VoteResult::Pending => {}
        }
    }

    fn handle_append_entries(
        &mut self,
        leader: ReplicaId,
        prev_log_index: Index,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: Index,
    ) {
        let committed = self.raft_log.committed();
        if prev_log_index < committed {
            self.send_append_success(leader, committed);
            return;
        }

        // > Reply false if log doesn’t contain an entry at prevLogIndex
        // > whose term matches prevLogTerm (§5.3)
        match self
            .raft_log
            .maybe_append(prev_log_index, prev_log_term, leader_commit, entries)
        {
            Some(last_new_index) => self.send_append_success(leader, last_new_index),
            None => {
                let hint = cmp::min(prev_log_index, self.raft_log.last_index());
                let (reject_hint, hint_term) = self.raft_log.find_conflict_by_term(hint, prev_log_term);
                slog::debug!(
                    self.logger,
                    "Rejecting append at {:?} (term {:?}). Hint: {:?} at term {:?}",
                    prev_log_index,
                    prev_log_term,
                    reject_hint,
                    hint_term
                );
                self.send(
                    leader,
                    MessageBody::AppendEntriesResponse {
                        success: false,
                        index: prev_log_index,
                        reject_hint,
                        hint_term,
                    },
                );
            }
        }
    }

    fn send_append_success(&mut self, leader: ReplicaId, index: Index) {
        self.send(
            leader,
            MessageBody::AppendEntriesResponse {
                success: true,
                index,
                reject_hint: Index::zero(),
                hint_term: Term::default(),
            },
        );
    }

    fn handle_heartbeat(&mut self, leader: ReplicaId, leader_commit: Index, read_context: Option<ReadContext>) {
        // The leader never sends a commit index beyond what it knows we've matched.
        let commit = cmp::min(leader_commit, self.raft_log.last_index());
        self.raft_log.commit_to(commit);
        self.send(leader, MessageBody::HeartbeatResponse { read_context });
    }

    fn handle_install_snapshot(&mut self, leader: ReplicaId, snapshot: Snapshot) {
        let (index, term) = (snapshot.index(), snapshot.term());
        let committed = self.raft_log.committed();

        if index <= committed {
            slog::info!(
                self.logger,
                "Ignoring stale snapshot at {:?}; already committed {:?}",
                index,
                committed
            );
            self.send_append_success(leader, committed);
            return;
        }

        if self.raft_log.match_term(index, term) {
            slog::info!(
                self.logger,
                "Log already contains snapshot point {:?}. Fast-forwarding commit.",
                index
            );
            self.raft_log.commit_to(index);
            self.send_append_success(leader, index);
            return;
        }

        self.membership = snapshot.metadata.config_state.clone();
        self.raft_log.restore(snapshot.clone());
        self.latest_snapshot = Some(snapshot);
        slog::info!(
            self.logger,
            "Installed snapshot at [index: {:?}, term: {:?}]. Config: {:?}",
            index,
            term,
            self.membership
        );

        self.send_append_success(leader, self.raft_log.last_index());
    }

    fn handle_append_response(
        &mut self,
        from: ReplicaId,
        success: bool,
        index: Index,
        reject_hint: Index,
        hint_term: Term,
    ) {
        let raft_log = &self.raft_log;
        let logger = &self.logger;
        let ls = match self.election_state.leader_state_mut() {
            Some(ls) => ls,
            None => return,
        };
        let pr = match ls.tracker.peer_state_mut(&from) {
            Some(pr) => pr,
            None => return,
        };
        pr.mark_active();

        if !success {
            // Skip over every entry of a mismatching term in one round trip.
            let probe_from = if hint_term > Term::default() {
                raft_log.find_conflict_by_term(reject_hint, hint_term).0
            } else {
                reject_hint
            };
            if pr.maybe_decr_to(index, probe_from) {
                slog::debug!(logger, "Peer {:?} rejected append at {:?}. Now {:?}", from, index, pr);
                if pr.mode() == ReplicationMode::Replicate {
                    pr.become_probe();
                }
                self.maybe_send_append(&from, true);
            }
            return;
        }

        let was_paused = pr.is_paused();
        if !pr.maybe_update(index) {
            return;
        }
        match pr.mode() {
            ReplicationMode::Probe => pr.become_replicate(),
            ReplicationMode::Snapshot { .. } => {
                if pr.snapshot_done() {
                    slog::info!(logger, "Peer {:?} caught up after snapshot at {:?}", from, index);
                    pr.become_probe();
                }
            }
            ReplicationMode::Replicate => pr.free_inflight_to(index),
        }

        if self.maybe_commit() {
            self.bcast_append();
        } else if was_paused {
            self.maybe_send_append(&from, true);
        }
        while self.maybe_send_append(&from, false) {}
    }

    fn handle_heartbeat_response(&mut self, from: ReplicaId, read_context: Option<ReadContext>) {
        let last_index = self.raft_log.last_index();
        let lagging = {
            let ls = match self.election_state.leader_state_mut() {
                Some(ls) => ls,
                None => return,
            };
            let pr = match ls.tracker.peer_state_mut(&from) {
                Some(pr) => pr,
                None => return,
            };
            pr.mark_active();
            pr.heartbeat_acked();
            pr.matched() < last_index
        };
        if lagging {
            self.maybe_send_append(&from, false);
        }

        let read_context = match read_context {
            Some(read_context) => read_context,
            None => return,
        };
        let voters = self.membership.joint_config();
        let released = {
            let ls = match self.election_state.leader_state_mut() {
                Some(ls) => ls,
                None => return,
            };
            let acks = match ls.read_only.recv_ack(&from, &read_context) {
                Some(acks) => acks,
                None => return,
            };
            let votes: HashMap<ReplicaId, bool> = acks.iter().map(|id| (id.clone(), true)).collect();
            if voters.vote_result(&votes) != VoteResult::Won {
                return;
            }
            ls.read_only.advance(&read_context)
        };
        for (read_context, index) in released {
            self.respond_read(read_context, index);
        }
    }

    // ------- Replication -------

    /// Sends the next append (or snapshot) to `to` if its progress allows. Returns true if a
    /// message was sent.
    fn maybe_send_append(&mut self, to: &ReplicaId, send_if_empty: bool) -> bool {
        if *to == self.my_replica_id {
            return false;
        }

        let ls = match self.election_state.leader_state_mut() {
            Some(ls) => ls,
            None => return false,
        };
        let pr = match ls.tracker.peer_state_mut(to) {
            Some(pr) => pr,
            None => return false,
        };
        if pr.is_paused() {
            return false;
        }

        let term = self.local_state.current_term();
        let prev_log_index = pr.next().minus(1);
        let body = match self.raft_log.term(prev_log_index) {
            Some(prev_log_term) => {
                let last_index = self.raft_log.last_index();
                let entries = if pr.next() <= last_index {
                    self.raft_log.slice(pr.next(), last_index, self.max_entries_per_append)
                } else {
                    Vec::new()
                };
                if entries.is_empty() && !send_if_empty {
                    return false;
                }
                pr.sent_entries(entries.last().map(|e| e.index));
                MessageBody::AppendEntries {
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: self.raft_log.committed(),
                }
            }
            None => {
                // Peer needs entries we've compacted away.
                let snapshot = match &self.latest_snapshot {
                    Some(snapshot) => snapshot.clone(),
                    None => {
                        slog::warn!(
                            self.logger,
                            "Peer {:?} needs compacted entry {:?} but no snapshot is available",
                            to,
                            prev_log_index
                        );
                        return false;
                    }
                };
                slog::info!(
                    self.logger,
                    "Sending snapshot at {:?} to {:?} (peer progress {:?})",
                    snapshot.index(),
                    to,
                    pr
                );
                pr.become_snapshot(snapshot.index());
                MessageBody::InstallSnapshot { snapshot }
            }
        };

        self.msgs.push(Message {
            from: self.my_replica_id.clone(),
            to: to.clone(),
            term,
            body,
        });
        true
    }

    fn bcast_append(&mut self) {
        let peer_ids = match self.election_state.leader_state() {
            Some(ls) => ls.tracker.peer_ids(),
            None => return,
        };
        for peer_id in peer_ids {
            self.maybe_send_append(&peer_id, true);
        }
    }

    fn bcast_heartbeat(&mut self) {
        let committed = self.raft_log.committed();
        let ls = match self.election_state.leader_state() {
            Some(ls) => ls,
            None => return,
        };
        let read_context = ls.read_only.last_pending_request().cloned();

        let mut heartbeats = Vec::new();
        for (peer_id, pr) in ls.tracker.peers_iter() {
            if *peer_id == self.my_replica_id {
                continue;
            }
            heartbeats.push((
                peer_id.clone(),
                MessageBody::Heartbeat {
                    leader_commit: cmp::min(pr.matched(), committed),
                    read_context: read_context.clone(),
                },
            ));
        }
        for (peer_id, body) in heartbeats {
            self.send(peer_id, body);
        }
    }

    /// Advances the commit index to what a quorum has matched. Returns true if it moved.
    fn maybe_commit(&mut self) -> bool {
        let voters = self.membership.joint_config();
        let quorum_index = match self.election_state.leader_state() {
            Some(ls) => ls.tracker.committed_index(&voters),
            None => return false,
        };

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        if !self
            .raft_log
            .maybe_commit(quorum_index, self.local_state.current_term())
        {
            return false;
        }

        let waiting = match self.election_state.leader_state_mut() {
            Some(ls) => mem::take(&mut ls.reads_awaiting_commit),
            None => Vec::new(),
        };
        for read_context in waiting {
            self.leader_read_index(read_context);
        }
        true
    }

    // ------- Linearizable reads -------

    /// Requests a read index for `read_context`. The result surfaces as a `ReadState` in a later
    /// ready batch of the replica that originated the request.
    pub fn read_index(&mut self, read_context: ReadContext) -> Result<(), NoLeader> {
        match &self.election_state {
            ElectionState::Leader(_) => {
                self.leader_read_index(read_context);
                Ok(())
            }
            ElectionState::Follower(FollowerState { leader: Some(leader) }) => {
                let leader = leader.clone();
                self.send(leader, MessageBody::ReadIndex { read_context });
                Ok(())
            }
            _ => Err(NoLeader),
        }
    }

    fn leader_read_index(&mut self, read_context: ReadContext) {
        let committed = self.raft_log.committed();
        let committed_in_term = self.raft_log.term(committed) == Some(self.local_state.current_term());
        let single_voter = self.membership.joint_config().is_single_voter(&self.my_replica_id);

        let ls = match self.election_state.leader_state_mut() {
            Some(ls) => ls,
            None => return,
        };
        if !committed_in_term {
            ls.reads_awaiting_commit.push(read_context);
            return;
        }
        if single_voter {
            self.respond_read(read_context, committed);
            return;
        }

        ls.read_only.add_request(committed, read_context, &self.my_replica_id);
        self.bcast_heartbeat();
    }

    fn respond_read(&mut self, read_context: ReadContext, index: Index) {
        if read_context.origin == self.my_replica_id {
            self.read_states.push(ReadState { index, read_context });
        } else {
            let origin = read_context.origin.clone();
            self.send(
                origin,
                MessageBody::ReadIndexResponse {
                    read_context,
                    read_index: index,
                },
            );
        }
    }

    // ------- Feedback from the drivers -------

    /// Applies a committed conf change entry to the membership. Called by the apply pipeline for
    /// every ConfChange entry, in log order.
    pub fn apply_conf_change(&mut self, change: &ConfChange) -> ConfigState {
        match self.membership.apply(change) {
            Ok(new_config) => self.membership = new_config,
            Err(e) => {
                slog::warn!(self.logger, "Ignoring committed conf change {:?}: {}", change, e);
                return self.membership.clone();
            }
        }
        slog::info!(self.logger, "Applied conf change. New config: {:?}", self.membership);

        let members = self.membership.members();
        let last_index = self.raft_log.last_index();
        if let Some(ls) = self.election_state.leader_state_mut() {
            ls.tracker.set_members(&members, last_index);
        } else {
            return self.membership.clone();
        }

        if !self.membership.is_voter(&self.my_replica_id) {
            slog::info!(self.logger, "Removed from voters. Stepping down as leader.");
            let term = self.local_state.current_term();
            self.become_follower(term, None);
            return self.membership.clone();
        }

        // A smaller quorum may already agree on a higher index. Either way, new members need
        // their first append.
        self.maybe_commit();
        self.bcast_append();

        self.membership.clone()
    }

    /// Records progress of the apply pipeline.
    pub fn applied_to(&mut self, index: Index) {
        self.raft_log.applied_to(index);
        self.maybe_auto_leave_joint();
    }

    fn maybe_auto_leave_joint(&mut self) {
        if let ElectionState::Leader(_) = self.election_state {
            if self.membership.is_joint() && self.pending_conf_index <= self.raft_log.applied() {
                slog::info!(self.logger, "Joint config applied. Proposing to leave it.");
                self.append_conf_change(&ConfChange::leave_joint());
                self.bcast_append();
            }
        }
    }

    /// A local snapshot through `snapshot.index()` is durable. Compacts the log behind it and
    /// returns the new compaction point, up to which durable log storage may be released.
    pub fn snapshot_created(&mut self, snapshot: Snapshot) -> Index {
        let compact_to = snapshot.index().minus(self.snapshot_catchup_entries);
        let is_newer = self
            .latest_snapshot
            .as_ref()
            .map(|s| s.index() < snapshot.index())
            .unwrap_or(true);
        if is_newer {
            self.latest_snapshot = Some(snapshot);
        }

        if self.raft_log.compact_to(compact_to) {
            slog::info!(self.logger, "Compacted log through {:?}", compact_to);
        }
        self.raft_log.first_index().minus(1)
    }

    pub fn report_unreachable(&mut self, peer: &ReplicaId) {
        if let Some(ls) = self.election_state.leader_state_mut() {
            if let Some(pr) = ls.tracker.peer_state_mut(peer) {
                if pr.mode() == ReplicationMode::Replicate {
                    pr.become_probe();
                }
            }
        }
    }

    pub fn report_snapshot(&mut self, peer: &ReplicaId, success: bool) {
        if let Some(ls) = self.election_state.leader_state_mut() {
            if let Some(pr) = ls.tracker.peer_state_mut(peer) {
                if let ReplicationMode::Snapshot { .. } = pr.mode() {
                    if success {
                        pr.become_probe();
                    } else {
                        slog::warn!(self.logger, "Snapshot transfer to {:?} failed", peer);
                        pr.snapshot_failure();
                    }
                }
            }
        }
    }

    // ------- Ready -------

    /// Returns pending work for the drivers, or None if there's nothing to do or the previous
    /// batch hasn't been acknowledged via `advance()` yet.
    pub fn ready(&mut self) -> Option<ReadyBatch> {
        if self.ready_outstanding {
            return None;
        }

        let soft_state = self.soft_state();
        let hard_state = self.local_state.hard_state(self.raft_log.committed());
        let has_work = soft_state != self.prev_soft_state
            || hard_state != self.prev_hard_state
            || self.raft_log.pending_snapshot().is_some()
            || self.raft_log.has_unstable()
            || self.raft_log.has_next_committed()
            || !self.msgs.is_empty()
            || !self.read_states.is_empty();
        if !has_work {
            return None;
        }

        let mut batch = ReadyBatch::default();
        if soft_state != self.prev_soft_state {
            self.prev_soft_state = soft_state.clone();
            batch.soft_state = Some(soft_state);
        }
        if hard_state != self.prev_hard_state {
            self.prev_hard_state = hard_state.clone();
            batch.hard_state = Some(hard_state);
        }
        batch.snapshot = self.raft_log.pending_snapshot().cloned();
        batch.entries = self.raft_log.unstable_entries().to_vec();
        batch.committed_entries = self.raft_log.next_committed_entries(MAX_COMMITTED_ENTRIES_PER_READY);
        batch.messages = mem::take(&mut self.msgs);
        batch.read_states = mem::take(&mut self.read_states);

        self.ready_outstanding = true;
        Some(batch)
    }

    /// Acknowledges that the last ready batch was fully processed.
    pub fn advance(&mut self, ack: ReadyAck) {
        self.ready_outstanding = false;

        if let Some(index) = ack.installed_snapshot {
            self.raft_log.stable_snapshot_to(index);
        }
        if let Some((index, term)) = ack.last_persisted {
            self.raft_log.stable_to(index, term);
        }

        // The leader counts itself toward a quorum only for entries it has persisted.
        let stable = self.raft_log.stable_to_index();
        let my_id = &self.my_replica_id;
        let updated = match self.election_state.leader_state_mut() {
            Some(ls) => ls
                .tracker
                .peer_state_mut(my_id)
                .map(|pr| pr.maybe_update(stable))
                .unwrap_or(false),
            None => false,
        };
        if updated && self.maybe_commit() {
            self.bcast_append();
        }
    }

    fn send(&mut self, to: ReplicaId, body: MessageBody) {
        self.msgs.push(Message {
            from: self.my_replica_id.clone(),
            to,
            term: self.local_state.current_term(),
            body,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::membership::{ConfChangeKind, ConfChangeSingle};

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn id(raw: &str) -> ReplicaId {
        ReplicaId::new(raw)
    }

    fn new_replica(me: &str, voters: &[&str]) -> Replica {
        let config = ReplicaConfig {
            logger: logger(),
            my_replica_id: id(me),
            heartbeat_ticks: 1,
            election_ticks: 10,
            check_quorum: true,
            max_entries_per_append: 64,
            max_inflight_appends: 8,
            snapshot_catchup_entries: 0,
            rng_seed: Some(7),
        };
        let recovered = RecoveredState {
            initial_config: ConfigState::with_voters(voters.iter().map(|v| id(v))),
            ..RecoveredState::default()
        };
        Replica::new(config, recovered)
    }

    /// Persists everything and acks, like the drivers would. Returns the batch's messages.
    fn process_ready(replica: &mut Replica) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(batch) = replica.ready() {
            let ack = batch.ack();
            messages.extend(batch.messages);
            replica.advance(ack);
        }
        messages
    }

    /// Ticks until the replica starts an election.
    fn elapse_election(replica: &mut Replica) {
        for _ in 0..20 {
            replica.tick();
            if replica.soft_state().role != Role::Follower {
                return;
            }
        }
        panic!("Election timeout never fired");
    }

    #[test]
    fn single_voter_elects_itself_and_commits() {
        let mut replica = new_replica("a", &["a"]);

        elapse_election(&mut replica);
        assert_eq!(replica.soft_state().role, Role::Leader);

        let (index, term) = replica.propose(Bytes::from_static(b"x")).unwrap();
        assert_eq!(index, Index::new(2));
        assert_eq!(term, Term::new(1));

        let batch = replica.ready().unwrap();
        // Nothing is committed until the leader's own entries are durable.
        assert!(batch.committed_entries.is_empty());
        replica.advance(batch.ack());

        let batch = replica.ready().unwrap();
        let committed: Vec<_> = batch.committed_entries.iter().map(|e| e.index.as_u64()).collect();
        assert_eq!(committed, vec![1, 2]);
        assert_eq!(batch.hard_state.unwrap().commit, Index::new(2));
    }

    #[test]
    fn ready_is_blocked_until_advance() {
        let mut replica = new_replica("a", &["a", "b", "c"]);
        elapse_election(&mut replica);

        let batch = replica.ready().unwrap();
        assert_eq!(batch.soft_state.as_ref().unwrap().role, Role::Candidate);
        assert_eq!(batch.messages.len(), 2);

        replica.tick();
        assert!(replica.ready().is_none());

        replica.advance(batch.ack());
        assert!(replica.ready().is_none());
    }

    #[test]
    fn follower_rejects_proposals_with_leader_hint() {
        let mut replica = new_replica("b", &["a", "b", "c"]);
        replica.step(Message {
            from: id("a"),
            to: id("b"),
            term: Term::new(1),
            body: MessageBody::Heartbeat {
                leader_commit: Index::zero(),
                read_context: None,
            },
        });

        assert_eq!(
            replica.propose(Bytes::from_static(b"x")),
            Err(ProposeError::NotLeader { leader: Some(id("a")) })
        );
    }

    #[test]
    fn vote_granted_once_per_term() {
        let mut replica = new_replica("c", &["a", "b", "c"]);
        let vote_request = |from: &str| Message {
            from: id(from),
            to: id("c"),
            term: Term::new(1),
            body: MessageBody::RequestVote {
                last_log_index: Index::zero(),
                last_log_term: Term::default(),
            },
        };

        replica.step(vote_request("a"));
        replica.step(vote_request("b"));
        // Retransmission from the same candidate gets the same answer.
        replica.step(vote_request("a"));

        let batch = replica.ready().unwrap();
        assert_eq!(batch.hard_state.unwrap().voted_for, Some(id("a")));
        let grants: Vec<_> = batch
            .messages
            .iter()
            .map(|m| match m.body {
                MessageBody::RequestVoteResponse { vote_granted } => (m.to.as_str().to_string(), vote_granted),
                _ => panic!("unexpected {:?}", m),
            })
            .collect();
        assert_eq!(
            grants,
            vec![("a".to_string(), true), ("b".to_string(), false), ("a".to_string(), true)]
        );
    }

    #[test]
    fn vote_denied_for_stale_log() {
        let mut replica = new_replica("c", &["a", "b", "c"]);
        replica.step(Message {
            from: id("a"),
            to: id("c"),
            term: Term::new(2),
            body: MessageBody::AppendEntries {
                prev_log_index: Index::zero(),
                prev_log_term: Term::default(),
                entries: vec![LogEntry::new_normal(Term::new(2), Index::new(1), Bytes::new())],
                leader_commit: Index::zero(),
            },
        });
        process_ready(&mut replica);
        elapse_election(&mut replica);
        process_ready(&mut replica);

        // A higher term resets our vote, so only the log check can deny it.
        let term = replica.soft_state().term;
        replica.step(Message {
            from: id("b"),
            to: id("c"),
            term: Term::new(term.as_u64() + 1),
            body: MessageBody::RequestVote {
                last_log_index: Index::new(5),
                last_log_term: Term::new(1),
            },
        });
        let messages = process_ready(&mut replica);
        assert!(messages.iter().any(|m| m.to == id("b")
            && m.body == MessageBody::RequestVoteResponse { vote_granted: false }));
    }

    #[test]
    fn stale_leader_is_told_about_higher_term() {
        let mut replica = new_replica("b", &["a", "b", "c"]);
        elapse_election(&mut replica);
        process_ready(&mut replica);
        let term = replica.soft_state().term;

        replica.step(Message {
            from: id("a"),
            to: id("b"),
            term: Term::new(term.as_u64() - 1),
            body: MessageBody::Heartbeat {
                leader_commit: Index::zero(),
                read_context: None,
            },
        });

        let messages = process_ready(&mut replica);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to, id("a"));
        assert_eq!(messages[0].term, term);
    }

    #[test]
    fn conflicting_follower_log_is_repaired() {
        let mut follower = new_replica("b", &["a", "b"]);
        // Entries 1..=3 at term 1 from an old leader; 2 and 3 never committed.
        follower.step(Message {
            from: id("a"),
            to: id("b"),
            term: Term::new(1),
            body: MessageBody::AppendEntries {
                prev_log_index: Index::zero(),
                prev_log_term: Term::default(),
                entries: (1..=3)
                    .map(|i| LogEntry::new_normal(Term::new(1), Index::new(i), Bytes::new()))
                    .collect(),
                leader_commit: Index::new(1),
            },
        });
        process_ready(&mut follower);

        // New leader at term 3 has [1@1, 2@2] and probes after its last entry.
        follower.step(Message {
            from: id("a"),
            to: id("b"),
            term: Term::new(3),
            body: MessageBody::AppendEntries {
                prev_log_index: Index::new(2),
                prev_log_term: Term::new(2),
                entries: vec![],
                leader_commit: Index::new(1),
            },
        });
        let messages = process_ready(&mut follower);
        assert_eq!(
            messages[0].body,
            MessageBody::AppendEntriesResponse {
                success: false,
                index: Index::new(2),
                reject_hint: Index::new(2),
                hint_term: Term::new(1),
            }
        );

        follower.step(Message {
            from: id("a"),
            to: id("b"),
            term: Term::new(3),
            body: MessageBody::AppendEntries {
                prev_log_index: Index::new(1),
                prev_log_term: Term::new(1),
                entries: vec![LogEntry::new_normal(Term::new(2), Index::new(2), Bytes::new())],
                leader_commit: Index::new(2),
            },
        });
        let batch = follower.ready().unwrap();
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].term, Term::new(2));
        assert_eq!(batch.hard_state.unwrap().commit, Index::new(2));
        assert_eq!(follower.status().last_index, Index::new(2));
    }

    #[test]
    fn conf_change_requires_previous_to_be_applied() {
        let mut replica = new_replica("a", &["a"]);
        elapse_election(&mut replica);
        process_ready(&mut replica);

        // The noop from the election isn't applied yet.
        assert_eq!(
            replica.propose_conf_change(ConfChange::add_learner(id("l"), None)),
            Err(ProposeError::ConfChangeInProgress)
        );

        replica.applied_to(Index::new(1));
        let (index, _) = replica
            .propose_conf_change(ConfChange::add_learner(id("l"), None))
            .unwrap();
        assert_eq!(index, Index::new(2));
        assert_eq!(
            replica.propose_conf_change(ConfChange::add_voter(id("x"), None)),
            Err(ProposeError::ConfChangeInProgress)
        );

        let config = replica.apply_conf_change(&ConfChange::add_learner(id("l"), None));
        replica.applied_to(Index::new(2));
        assert!(config.is_learner(&id("l")));
        assert_eq!(
            replica.propose_conf_change(ConfChange::leave_joint()),
            Err(ProposeError::InvalidConfChange(ConfChangeError::NotJoint))
        );
    }

    #[test]
    fn single_voter_read_index_is_immediate() {
        let mut replica = new_replica("a", &["a"]);
        elapse_election(&mut replica);
        process_ready(&mut replica);

        let read_context = ReadContext { origin: id("a"), id: 1 };
        replica.read_index(read_context.clone()).unwrap();

        let batch = replica.ready().unwrap();
        assert_eq!(
            batch.read_states,
            vec![ReadState {
                index: Index::new(1),
                read_context
            }]
        );
    }

    #[test]
    fn candidate_has_no_leader_for_reads() {
        let mut replica = new_replica("a", &["a", "b", "c"]);
        elapse_election(&mut replica);

        assert_eq!(replica.read_index(ReadContext { origin: id("a"), id: 1 }), Err(NoLeader));
    }

    fn append_ack(from: &str, term: Term, index: u64) -> Message {
        Message {
            from: id(from),
            to: id("a"),
            term,
            body: MessageBody::AppendEntriesResponse {
                success: true,
                index: Index::new(index),
                reject_hint: Index::zero(),
                hint_term: Term::default(),
            },
        }
    }

    /// Elects "a" with b's vote and commits its noop.
    fn elect_a(voters: &[&str]) -> Replica {
        let mut leader = new_replica("a", voters);
        elapse_election(&mut leader);
        process_ready(&mut leader);
        let term = leader.soft_state().term;
        leader.step(Message {
            from: id("b"),
            to: id("a"),
            term,
            body: MessageBody::RequestVoteResponse { vote_granted: true },
        });
        assert_eq!(leader.soft_state().role, Role::Leader);
        process_ready(&mut leader);

        leader.step(append_ack("b", term, 1));
        process_ready(&mut leader);
        assert_eq!(leader.status().hard_state.commit, Index::new(1));
        leader
    }

    fn conf_change(changes: &[(ConfChangeKind, &str)]) -> ConfChange {
        ConfChange {
            changes: changes
                .iter()
                .map(|(kind, raw)| ConfChangeSingle {
                    kind: *kind,
                    replica_id: id(raw),
                    address: None,
                })
                .collect(),
        }
    }

    #[test]
    fn joint_config_needs_majorities_of_both_halves() {
        let mut leader = elect_a(&["a", "b", "c"]);
        let term = leader.soft_state().term;

        // {a, b, c} -> {a, d, e}
        let config = leader.apply_conf_change(&conf_change(&[
            (ConfChangeKind::RemoveNode, "b"),
            (ConfChangeKind::RemoveNode, "c"),
            (ConfChangeKind::AddVoter, "d"),
            (ConfChangeKind::AddVoter, "e"),
        ]));
        assert!(config.is_joint());
        process_ready(&mut leader);

        let (index, _) = leader.propose(Bytes::from_static(b"x")).unwrap();
        assert_eq!(index, Index::new(2));
        process_ready(&mut leader);

        // {a, d} is a majority of the incoming voters only.
        leader.step(append_ack("d", term, 2));
        process_ready(&mut leader);
        assert_eq!(leader.status().hard_state.commit, Index::new(1));

        // {a, b} completes the outgoing majority.
        leader.step(append_ack("b", term, 2));
        process_ready(&mut leader);
        assert_eq!(leader.status().hard_state.commit, Index::new(2));
    }

    #[test]
    fn leader_removed_by_joint_change_steps_down_when_it_is_left() {
        let mut leader = elect_a(&["a", "b", "c"]);

        // {a, b, c} -> {b, c, d}. The leader still votes in the outgoing half.
        let config = leader.apply_conf_change(&conf_change(&[
            (ConfChangeKind::RemoveNode, "a"),
            (ConfChangeKind::AddVoter, "d"),
        ]));
        assert!(config.is_joint());
        assert_eq!(leader.soft_state().role, Role::Leader);

        let config = leader.apply_conf_change(&ConfChange::leave_joint());
        assert!(!config.is_joint());
        assert!(!config.is_voter(&id("a")));
        assert_eq!(leader.soft_state().role, Role::Follower);
        assert_eq!(
            leader.propose(Bytes::from_static(b"x")),
            Err(ProposeError::NotLeader { leader: None })
        );
    }
}
