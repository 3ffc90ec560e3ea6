use crate::apply::EnqueuedProposal;
use crate::commitlog::Index;
use crate::replica::{ConfChange, ConfigState, Message, ProposeError, ReadyAck, ReplicaId, ReplicaStatus, Snapshot};
use bytes::Bytes;
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

/// Everything that can happen to a replica. All of it funnels through one queue so the replica is
/// only ever touched by its actor.
#[derive(Debug)]
pub(crate) enum Event {
    // ------- Time -------
    Tick,

    // ------- Clients -------
    // Leader: append and register for completion. Others: redirect.
    Propose(Bytes, Callback<EnqueuedProposal, ProposeError>),
    ProposeConfChange(ConfChange, Callback<EnqueuedProposal, ProposeError>),
    // Resolves with the read index once leadership is confirmed.
    ReadIndex(Callback<Index, ReadIndexRejection>),
    Status(oneshot::Sender<ReplicaStatus>),
    Campaign,

    // ------- Peers -------
    Step(Message),
    ReportUnreachable(ReplicaId),
    ReportSnapshot(ReplicaId, bool),

    // ------- Workers -------
    ReadyProcessed(ReadyAck),
    ApplyConfChange(ConfChange, oneshot::Sender<ConfigState>),
    Applied(Index),
    SnapshotCreated(Snapshot),
    Fatal(String),

    Shutdown,
}

#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub(crate) enum ReadIndexRejection {
    #[error("No known leader")]
    NoLeader,
    #[error("Leadership changed before the read was confirmed")]
    LeadershipChanged,
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(pub(crate) oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub(crate) fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

#[derive(Copy, Clone, Debug, thiserror::Error, Eq, PartialEq)]
#[error("Replica actor has exited")]
pub(crate) struct ActorExited;

/// ActorClient is the strong handle to a replica actor. The actor runs until every ActorClient is
/// dropped, or it is told to shut down.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn propose(&self, data: Bytes) -> Result<Result<EnqueuedProposal, ProposeError>, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Propose(data, Callback(tx))).await?;
        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn propose_conf_change(
        &self,
        change: ConfChange,
    ) -> Result<Result<EnqueuedProposal, ProposeError>, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::ProposeConfChange(change, Callback(tx))).await?;
        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn read_index(&self) -> Result<Result<Index, ReadIndexRejection>, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::ReadIndex(Callback(tx))).await?;
        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn status(&self) -> Result<ReplicaStatus, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Status(tx)).await?;
        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn campaign(&self) -> Result<(), ActorExited> {
        self.send(Event::Campaign).await
    }

    pub(crate) async fn shutdown(&self) -> Result<(), ActorExited> {
        self.send(Event::Shutdown).await
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        self.sender.send(event).await.map_err(|_| ActorExited)
    }
}

/// WeakActorClient is held by everything the actor itself (indirectly) owns: workers, the ticker,
/// transports and the RPC server. It doesn't keep the actor alive.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl WeakActorClient {
    pub(crate) fn upgrade(&self) -> Option<ActorClient> {
        self.sender.upgrade().map(|sender| ActorClient { sender })
    }

    pub(crate) async fn tick(&self) -> Result<(), ActorExited> {
        self.send(Event::Tick).await
    }

    pub(crate) async fn step(&self, message: Message) -> Result<(), ActorExited> {
        self.send(Event::Step(message)).await
    }

    /// Delivers a message without waiting. A full queue drops it, like a lossy network would.
    pub(crate) fn try_step(&self, message: Message) -> Result<(), ActorExited> {
        self.try_send(Event::Step(message))
    }

    pub(crate) fn try_report_unreachable(&self, peer: ReplicaId) -> Result<(), ActorExited> {
        self.try_send(Event::ReportUnreachable(peer))
    }

    pub(crate) fn try_report_snapshot(&self, peer: ReplicaId, success: bool) -> Result<(), ActorExited> {
        self.try_send(Event::ReportSnapshot(peer, success))
    }

    pub(crate) async fn report_unreachable(&self, peer: ReplicaId) -> Result<(), ActorExited> {
        self.send(Event::ReportUnreachable(peer)).await
    }

    pub(crate) async fn report_snapshot(&self, peer: ReplicaId, success: bool) -> Result<(), ActorExited> {
        self.send(Event::ReportSnapshot(peer, success)).await
    }

    pub(crate) async fn ready_processed(&self, ack: ReadyAck) -> Result<(), ActorExited> {
        self.send(Event::ReadyProcessed(ack)).await
    }

    pub(crate) async fn apply_conf_change(&self, change: ConfChange) -> Result<ConfigState, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::ApplyConfChange(change, tx)).await?;
        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn applied(&self, index: Index) -> Result<(), ActorExited> {
        self.send(Event::Applied(index)).await
    }

    pub(crate) async fn snapshot_created(&self, snapshot: Snapshot) -> Result<(), ActorExited> {
        self.send(Event::SnapshotCreated(snapshot)).await
    }

    pub(crate) async fn fatal(&self, reason: String) -> Result<(), ActorExited> {
        self.send(Event::Fatal(reason)).await
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        let sender = self.sender.upgrade().ok_or(ActorExited)?;
        sender.send(event).await.map_err(|_| ActorExited)
    }

    fn try_send(&self, event: Event) -> Result<(), ActorExited> {
        let sender = self.sender.upgrade().ok_or(ActorExited)?;
        match sender.try_send(event) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ActorExited),
        }
    }
}
