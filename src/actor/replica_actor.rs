use crate::actor::client::{ActorExited, Callback, Event, ReadIndexRejection};
use crate::actor::persist_worker::PersistTask;
use crate::apply::ProposalRegistrar;
use crate::commitlog::Index;
use crate::replica::{
    ConfChange, ConfigState, ElectionStateChangeNotifier, ReadContext, Replica, ReplicaId, Role, SoftState, Term,
};
use crate::server::RpcServerShutdownHandle;
use crate::transport::Transport;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

/// ReplicaActor is replica logic in actor model. It owns the `Replica`, feeds it events one at a
/// time, and hands every ready batch to the persist worker.
pub(crate) struct ReplicaActor {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: Replica,
    persist_queue: mpsc::Sender<PersistTask>,
    registrar: ProposalRegistrar,
    transport: Arc<dyn Transport>,
    election_notifier: ElectionStateChangeNotifier,

    last_soft_state: SoftState,
    pending_reads: HashMap<u64, PendingRead>,
    next_read_id: u64,
    // Reads unanswered for this many ticks are failed.
    read_timeout_ticks: u64,
    ticks: u64,

    // Server stops once this drops.
    _server_shutdown: Option<RpcServerShutdownHandle>,
}

struct PendingRead {
    callback: Callback<Index, ReadIndexRejection>,
    // Leadership the read was issued under.
    term: Term,
    leader: Option<ReplicaId>,
    issued_at_tick: u64,
}

enum Flow {
    Continue,
    Stop,
}

impl ReplicaActor {
    pub(crate) fn new(
        logger: slog::Logger,
        receiver: mpsc::Receiver<Event>,
        replica: Replica,
        persist_queue: mpsc::Sender<PersistTask>,
        registrar: ProposalRegistrar,
        transport: Arc<dyn Transport>,
        election_notifier: ElectionStateChangeNotifier,
        election_ticks: u32,
        server_shutdown: Option<RpcServerShutdownHandle>,
    ) -> Self {
        let last_soft_state = replica.soft_state();
        ReplicaActor {
            logger,
            receiver,
            replica,
            persist_queue,
            registrar,
            transport,
            election_notifier,
            last_soft_state,
            pending_reads: HashMap::new(),
            next_read_id: 0,
            read_timeout_ticks: u64::from(election_ticks),
            ticks: 0,
            _server_shutdown: server_shutdown,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            if let Flow::Stop = self.handle_event(event) {
                break;
            }
            if self.drain_ready().await.is_err() {
                slog::crit!(self.logger, "Persist worker has exited. Stopping replica.");
                break;
            }
        }

        self.registrar.abandon_all();
        slog::info!(self.logger, "Replica actor exiting. Final status: {:?}", self.replica.status());
    }

    // This must NOT be async. Any long running work must be spawned on another actor
    // and/or come as a callback to this actor.
    fn handle_event(&mut self, event: Event) -> Flow {
        match event {
            Event::Tick => {
                self.replica.tick();
                self.ticks += 1;
                self.expire_reads();
            }
            Event::Propose(data, callback) => {
                let result = self
                    .replica
                    .propose(data)
                    .map(|(index, term)| self.registrar.register(index, term));
                callback.send(result);
            }
            Event::ProposeConfChange(change, callback) => {
                let result = self
                    .replica
                    .propose_conf_change(change)
                    .map(|(index, term)| self.registrar.register(index, term));
                callback.send(result);
            }
            Event::ReadIndex(callback) => self.handle_read_index(callback),
            Event::Status(responder) => {
                let _ = responder.send(self.replica.status());
            }
            Event::Campaign => self.replica.campaign(),
            Event::Step(message) => {
                if &message.to == self.replica.my_replica_id() {
                    self.replica.step(message);
                } else {
                    slog::debug!(self.logger, "Dropping message addressed to {:?}", message.to);
                }
            }
            Event::ReportUnreachable(peer) => self.replica.report_unreachable(&peer),
            Event::ReportSnapshot(peer, success) => self.replica.report_snapshot(&peer, success),
            Event::ReadyProcessed(ack) => self.replica.advance(ack),
            Event::ApplyConfChange(change, responder) => {
                let members_before = self.replica.config_state().members();
                self.learn_peer_addresses(&change);
                let config_state = self.replica.apply_conf_change(&change);
                self.forget_removed_peers(&members_before, &config_state);
                let _ = responder.send(config_state);
            }
            Event::Applied(index) => self.replica.applied_to(index),
            Event::SnapshotCreated(snapshot) => {
                let release_to = self.replica.snapshot_created(snapshot);
                // Advisory. A later snapshot releases whatever this one couldn't.
                if self.persist_queue.try_send(PersistTask::ReleaseLog(release_to)).is_err() {
                    slog::debug!(self.logger, "Persist queue busy. Skipping log release to {:?}", release_to);
                }
            }
            Event::Fatal(reason) => {
                slog::crit!(self.logger, "Fatal error, replica stops participating: {}", reason);
                return Flow::Stop;
            }
            Event::Shutdown => {
                slog::info!(self.logger, "Shutting down");
                return Flow::Stop;
            }
        }

        Flow::Continue
    }

    fn handle_read_index(&mut self, callback: Callback<Index, ReadIndexRejection>) {
        self.next_read_id += 1;
        let read_context = ReadContext {
            origin: self.replica.my_replica_id().clone(),
            id: self.next_read_id,
        };

        match self.replica.read_index(read_context) {
            Ok(()) => {
                let soft_state = self.replica.soft_state();
                let pending = PendingRead {
                    callback,
                    term: soft_state.term,
                    leader: soft_state.leader,
                    issued_at_tick: self.ticks,
                };
                self.pending_reads.insert(self.next_read_id, pending);
            }
            Err(_) => callback.send(Err(ReadIndexRejection::NoLeader)),
        }
    }

    fn learn_peer_addresses(&self, change: &ConfChange) {
        for single in &change.changes {
            if let Some(address) = &single.address {
                self.transport.add_peer(&single.replica_id, address);
            }
        }
    }

    /// Peers still in the outgoing half of a joint config keep their connection until it's left.
    fn forget_removed_peers(&self, members_before: &BTreeSet<ReplicaId>, config_state: &ConfigState) {
        for replica_id in members_before {
            if !config_state.is_member(replica_id) && replica_id != self.replica.my_replica_id() {
                self.transport.remove_peer(replica_id);
            }
        }
    }

    /// A ReadIndex forwarded to the leader may be lost without the leadership changing.
    fn expire_reads(&mut self) {
        let ticks = self.ticks;
        let timeout = self.read_timeout_ticks;
        self.fail_reads(|read| ticks - read.issued_at_tick >= timeout);
    }

    fn fail_reads<F: Fn(&PendingRead) -> bool>(&mut self, should_fail: F) {
        let failed: Vec<u64> = self
            .pending_reads
            .iter()
            .filter(|(_, read)| should_fail(*read))
            .map(|(id, _)| *id)
            .collect();
        for id in failed {
            if let Some(read) = self.pending_reads.remove(&id) {
                read.callback.send(Err(ReadIndexRejection::LeadershipChanged));
            }
        }
    }

    /// Hands the next ready batch to the persist worker, if the replica has one. Parts of the
    /// batch that only concern this actor are handled here.
    async fn drain_ready(&mut self) -> Result<(), ActorExited> {
        while let Some(mut batch) = self.replica.ready() {
            if let Some(soft_state) = batch.soft_state.take() {
                self.on_soft_state_change(soft_state);
            }
            for read_state in batch.read_states.drain(..) {
                if let Some(pending) = self.pending_reads.remove(&read_state.read_context.id) {
                    pending.callback.send(Ok(read_state.index));
                }
            }

            let nothing_to_persist = !batch.must_sync()
                && batch.messages.is_empty()
                && batch.committed_entries.is_empty();
            if nothing_to_persist {
                self.replica.advance(batch.ack());
                continue;
            }

            return self
                .persist_queue
                .send(PersistTask::Ready(batch))
                .await
                .map_err(|_| ActorExited);
        }

        Ok(())
    }

    fn on_soft_state_change(&mut self, soft_state: SoftState) {
        let previous = std::mem::replace(&mut self.last_soft_state, soft_state.clone());
        slog::info!(
            self.logger,
            "Election state changed: {:?} (term {:?}, leader {:?}) -> {:?} (term {:?}, leader {:?})",
            previous.role,
            previous.term,
            previous.leader,
            soft_state.role,
            soft_state.term,
            soft_state.leader
        );

        let was_leader_of_term = previous.role == Role::Leader;
        if was_leader_of_term && (soft_state.role != Role::Leader || soft_state.term != previous.term) {
            self.registrar.abandon_all();
        }
        // A read confirmed by a leader that's gone will never be answered.
        self.fail_reads(|read| read.term != soft_state.term || read.leader != soft_state.leader);

        self.election_notifier.notify_new_state(soft_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorClient, Callback};
    use crate::apply::proposal_registry;
    use crate::replica::{
        election_state_channel, ConfChangeKind, ConfChangeSingle, Message, MessageBody, RecoveredState, ReplicaConfig,
    };
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    const ELECTION_TICKS: u32 = 10;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Message>>,
        removed: Mutex<Vec<ReplicaId>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, message: Message) {
            self.sent.lock().unwrap().push(message);
        }

        fn remove_peer(&self, replica_id: &ReplicaId) {
            self.removed.lock().unwrap().push(replica_id.clone());
        }
    }

    struct Harness {
        actor: ReplicaActor,
        transport: Arc<RecordingTransport>,
        _actor_client: ActorClient,
        _persist_rx: mpsc::Receiver<PersistTask>,
    }

    fn id(raw: &str) -> ReplicaId {
        ReplicaId::new(raw)
    }

    fn harness(me: &str, voters: &[&str]) -> Harness {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let replica = Replica::new(
            ReplicaConfig {
                logger: logger.clone(),
                my_replica_id: id(me),
                heartbeat_ticks: 1,
                election_ticks: ELECTION_TICKS,
                check_quorum: true,
                max_entries_per_append: 64,
                max_inflight_appends: 8,
                snapshot_catchup_entries: 0,
                rng_seed: Some(3),
            },
            RecoveredState {
                initial_config: ConfigState::with_voters(voters.iter().map(|v| id(v))),
                ..RecoveredState::default()
            },
        );
        let (actor_client, receiver) = ActorClient::new(16);
        let (persist_tx, persist_rx) = mpsc::channel(16);
        let (registrar, _registry) = proposal_registry();
        let (election_notifier, _election_listener) = election_state_channel(replica.soft_state());
        let transport = Arc::new(RecordingTransport::default());

        let actor = ReplicaActor::new(
            logger,
            receiver,
            replica,
            persist_tx,
            registrar,
            transport.clone(),
            election_notifier,
            ELECTION_TICKS,
            None,
        );

        Harness {
            actor,
            transport,
            _actor_client: actor_client,
            _persist_rx: persist_rx,
        }
    }

    fn heartbeat(from: &str, to: &str) -> Event {
        Event::Step(Message {
            from: id(from),
            to: id(to),
            term: Term::new(1),
            body: MessageBody::Heartbeat {
                leader_commit: Index::zero(),
                read_context: None,
            },
        })
    }

    #[test]
    fn unanswered_forwarded_read_expires() {
        let mut h = harness("b", &["a", "b"]);
        h.actor.handle_event(heartbeat("a", "b"));

        let (tx, mut rx) = oneshot::channel();
        h.actor.handle_event(Event::ReadIndex(Callback(tx)));
        assert_eq!(h.actor.pending_reads.len(), 1);

        // The leader stays alive, but never answers the read.
        for _ in 0..ELECTION_TICKS - 1 {
            h.actor.handle_event(Event::Tick);
            h.actor.handle_event(heartbeat("a", "b"));
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(h.actor.replica.soft_state().leader, Some(id("a")));

        h.actor.handle_event(Event::Tick);
        assert_eq!(rx.try_recv().unwrap(), Err(ReadIndexRejection::LeadershipChanged));
        assert!(h.actor.pending_reads.is_empty());
    }

    #[test]
    fn read_without_leader_is_rejected() {
        let mut h = harness("b", &["a", "b"]);

        let (tx, mut rx) = oneshot::channel();
        h.actor.handle_event(Event::ReadIndex(Callback(tx)));
        assert_eq!(rx.try_recv().unwrap(), Err(ReadIndexRejection::NoLeader));
        assert!(h.actor.pending_reads.is_empty());
    }

    #[test]
    fn removed_members_are_dropped_from_the_transport() {
        let mut h = harness("a", &["a", "b", "c"]);

        let (tx, mut rx) = oneshot::channel();
        h.actor
            .handle_event(Event::ApplyConfChange(ConfChange::remove_node(id("c")), tx));
        let config_state = rx.try_recv().unwrap();

        assert!(!config_state.is_member(&id("c")));
        assert_eq!(*h.transport.removed.lock().unwrap(), vec![id("c")]);
        assert!(h.transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn outgoing_voters_stay_connected_until_joint_is_left() {
        let mut h = harness("a", &["a", "b", "c"]);
        let remove = |raw: &str| ConfChangeSingle {
            kind: ConfChangeKind::RemoveNode,
            replica_id: id(raw),
            address: None,
        };
        let change = ConfChange {
            changes: vec![remove("b"), remove("c")],
        };

        let (tx, mut rx) = oneshot::channel();
        h.actor.handle_event(Event::ApplyConfChange(change, tx));
        assert!(rx.try_recv().unwrap().is_joint());
        assert!(h.transport.removed.lock().unwrap().is_empty());

        let (tx, mut rx) = oneshot::channel();
        h.actor.handle_event(Event::ApplyConfChange(ConfChange::leave_joint(), tx));
        assert!(!rx.try_recv().unwrap().is_joint());
        assert_eq!(*h.transport.removed.lock().unwrap(), vec![id("b"), id("c")]);
    }
}
