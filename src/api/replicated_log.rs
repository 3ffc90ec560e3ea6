use crate::actor::{ActorClient, ReadIndexRejection};
use crate::api::types::{RaftEntryId, RaftLeaderInfo, RaftMemberInfo, RaftMembershipChange};
use crate::apply::{EnqueuedProposal, ProposalError, StateMachineOutput};
use crate::commitlog::Index;
use crate::replica::{
    ConfChange, ConfChangeError, ConfChangeKind, ConfChangeSingle, ProposeError, ReplicaId, ReplicaStatus,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};

/// Members whose addresses this replica knows, for leader redirects.
pub(crate) type MemberDirectory = Arc<Mutex<HashMap<String, RaftMemberInfo>>>;

/// ReplicatedLog is the replicated log for external application to append to, and to read from
/// linearizably.
#[derive(Clone)]
pub struct ReplicatedLog {
    actor_client: ActorClient,
    applied: watch::Receiver<Index>,
    members: MemberDirectory,
}

impl ReplicatedLog {
    pub(crate) fn new(actor_client: ActorClient, applied: watch::Receiver<Index>, members: MemberDirectory) -> Self {
        ReplicatedLog {
            actor_client,
            applied,
            members,
        }
    }

    /// Appends an entry to the leader's log. Returns once the entry is in the local log; the
    /// returned `PendingProposal` resolves once it's applied.
    pub async fn enqueue_entry(&self, input: EnqueueEntryInput) -> Result<PendingProposal, EnqueueEntryError> {
        let result = self
            .actor_client
            .propose(input.data)
            .await
            .map_err(|_| EnqueueEntryError::ReplicaExited)?;

        self.into_pending(result)
    }

    /// Appends an entry and waits for the state machine's output from applying it.
    pub async fn propose(&self, data: Bytes) -> Result<StateMachineOutput, ProposeEntryError> {
        let pending = self.enqueue_entry(EnqueueEntryInput { data }).await?;
        Ok(pending.wait().await?)
    }

    /// Proposes a membership change. New members must be reachable at the address in their
    /// `RaftMemberInfo`. An empty list leaves a joint configuration, which the leader also does on
    /// its own.
    pub async fn propose_conf_change(
        &self,
        changes: Vec<RaftMembershipChange>,
    ) -> Result<PendingProposal, EnqueueEntryError> {
        let mut conf_change = ConfChange::default();
        for change in changes {
            let single = match change {
                RaftMembershipChange::AddVoter(member) => self.learn_member(ConfChangeKind::AddVoter, member),
                RaftMembershipChange::AddLearner(member) => self.learn_member(ConfChangeKind::AddLearner, member),
                RaftMembershipChange::Remove(replica_id) => ConfChangeSingle {
                    kind: ConfChangeKind::RemoveNode,
                    replica_id: ReplicaId::new(replica_id),
                    address: None,
                },
            };
            conf_change.changes.push(single);
        }

        let result = self
            .actor_client
            .propose_conf_change(conf_change)
            .await
            .map_err(|_| EnqueueEntryError::ReplicaExited)?;

        self.into_pending(result)
    }

    /// Confirms with the leader that it is still leader, then waits until the local state machine
    /// has caught up to the leader's commit index. Reads made after this returns observe every
    /// write that completed before it was called.
    pub async fn read_index(&self) -> Result<ReadIndexToken, ReadIndexError> {
        let index = self
            .actor_client
            .read_index()
            .await
            .map_err(|_| ReadIndexError::ReplicaExited)?
            .map_err(ReadIndexError::from_rejection)?;

        let mut applied = self.applied.clone();
        loop {
            let current = *applied.borrow();
            if current >= index {
                break;
            }
            applied.changed().await.map_err(|_| ReadIndexError::ReplicaExited)?;
        }

        Ok(ReadIndexToken { index })
    }

    pub async fn status(&self) -> Result<ReplicaStatus, ReplicaExited> {
        self.actor_client.status().await.map_err(|_| ReplicaExited)
    }

    /// Starts an election right away, without waiting for the election timeout.
    pub async fn campaign(&self) -> Result<(), ReplicaExited> {
        self.actor_client.campaign().await.map_err(|_| ReplicaExited)
    }

    fn learn_member(&self, kind: ConfChangeKind, member: RaftMemberInfo) -> ConfChangeSingle {
        let single = ConfChangeSingle {
            kind,
            replica_id: ReplicaId::new(member.replica_id.clone()),
            address: Some(member.raft_rpc_addr().to_string()),
        };
        self.members
            .lock()
            .expect("Member directory lock poisoned")
            .insert(member.replica_id.clone(), member);

        single
    }

    fn into_pending(
        &self,
        result: Result<EnqueuedProposal, ProposeError>,
    ) -> Result<PendingProposal, EnqueueEntryError> {
        match result {
            Ok(enqueued) => Ok(PendingProposal::from_enqueued(enqueued)),
            Err(ProposeError::NotLeader { leader: None }) => Err(EnqueueEntryError::NoLeader),
            Err(ProposeError::NotLeader { leader: Some(leader) }) => {
                let member_info = self
                    .members
                    .lock()
                    .expect("Member directory lock poisoned")
                    .get(leader.as_str())
                    .cloned();
                Err(EnqueueEntryError::LeaderRedirect(RaftLeaderInfo {
                    replica_id: leader.into_inner(),
                    member_info,
                }))
            }
            Err(ProposeError::ConfChangeInProgress) => Err(EnqueueEntryError::ConfChangeInProgress),
            Err(ProposeError::InvalidConfChange(e)) => Err(EnqueueEntryError::InvalidConfChange(e)),
        }
    }
}

#[derive(Debug)]
pub struct EnqueueEntryInput {
    pub data: Bytes,
}

/// An entry in the leader's log, not yet applied.
#[derive(Debug)]
pub struct PendingProposal {
    entry_id: RaftEntryId,
    completion: oneshot::Receiver<Result<StateMachineOutput, ProposalError>>,
}

impl PendingProposal {
    pub fn entry_id(&self) -> RaftEntryId {
        self.entry_id
    }

    /// Waits for the entry to be applied to the local state machine.
    pub async fn wait(self) -> Result<StateMachineOutput, ProposalError> {
        match self.completion.await {
            Ok(result) => result,
            Err(_) => Err(ProposalError::ReplicaExited),
        }
    }
}

/// Proof that the local state machine has applied everything committed before `read_index` was
/// called.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReadIndexToken {
    index: Index,
}

impl ReadIndexToken {
    pub fn index(&self) -> u64 {
        self.index.as_u64()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueEntryError {
    #[error("I'm not leader")]
    LeaderRedirect(RaftLeaderInfo),

    // Can be retried with exponential backoff with recommended initial delay of 200ms. Likely an
    // election is in progress.
    #[error("Cluster is in a tough shape. No one is leader.")]
    NoLeader,

    #[error("A membership change is already in progress")]
    ConfChangeInProgress,

    #[error("Invalid membership change: {0}")]
    InvalidConfChange(ConfChangeError),

    // Replica logic runs on a background task. This error is returned if the task has exited.
    #[error("Replica task has exited")]
    ReplicaExited,
}

#[derive(Debug, thiserror::Error)]
pub enum ProposeEntryError {
    #[error(transparent)]
    Enqueue(#[from] EnqueueEntryError),
    #[error(transparent)]
    Proposal(#[from] ProposalError),
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ReadIndexError {
    #[error("Cluster is in a tough shape. No one is leader.")]
    NoLeader,
    // Safe to retry.
    #[error("Leadership changed before the read was confirmed")]
    LeadershipChanged,
    #[error("Replica task has exited")]
    ReplicaExited,
}

#[derive(Copy, Clone, Debug, thiserror::Error, Eq, PartialEq)]
#[error("Replica task has exited")]
pub struct ReplicaExited;

// ------- Conversions --------

impl PendingProposal {
    fn from_enqueued(enqueued: EnqueuedProposal) -> Self {
        PendingProposal {
            entry_id: RaftEntryId {
                term: enqueued.term,
                entry_index: enqueued.index,
            },
            completion: enqueued.completion,
        }
    }
}

impl ReadIndexError {
    fn from_rejection(rejection: ReadIndexRejection) -> Self {
        match rejection {
            ReadIndexRejection::NoLeader => ReadIndexError::NoLeader,
            ReadIndexRejection::LeadershipChanged => ReadIndexError::LeadershipChanged,
        }
    }
}
