use crate::actor::{ActorExited, WeakActorClient};
use crate::apply::proposals::ProposalRegistry;
use crate::apply::state_machine::{StateMachine, StateMachineError, StateMachineOutput};
use crate::commitlog::Index;
use crate::replica::{decode_conf_change, ConfigState, DecodeError, EntryKind, LogEntry, Snapshot, Term};
use crate::snapshot::{SnapshotError, SnapshotManager};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Committed work from one ready batch, in the order it must be applied.
#[derive(Debug)]
pub(crate) struct ApplyBatch {
    pub(crate) snapshot: Option<Snapshot>,
    pub(crate) entries: Vec<LogEntry>,
}

pub(crate) struct ApplyWorkerConfig {
    /// Take a snapshot once this many entries were applied since the last one.
    pub(crate) snapshot_threshold: u64,
    /// Where the replica resumes applying from, i.e. its newest snapshot.
    pub(crate) applied: Index,
    pub(crate) applied_term: Term,
    pub(crate) config_state: ConfigState,
}

#[derive(Debug, thiserror::Error)]
enum ApplyError {
    #[error("Gap in committed entries: expected index {expected:?}, got {got:?}")]
    Gap { expected: Index, got: Index },
    #[error("Committed conf change at {index:?} is undecodable: {source}")]
    BadConfChange { index: Index, source: DecodeError },
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    ActorExited(#[from] ActorExited),
}

/// ApplyWorker is the only owner of the application's state machine. It applies committed entries
/// strictly in log order, feeds membership changes back to the replica, takes snapshots, and
/// completes proposals.
pub(crate) struct ApplyWorker<S: StateMachine> {
    logger: slog::Logger,
    state_machine: S,
    receiver: mpsc::Receiver<ApplyBatch>,
    registry: ProposalRegistry,
    actor_client: WeakActorClient,
    snapshots: Arc<SnapshotManager>,
    applied_publisher: watch::Sender<Index>,

    snapshot_threshold: u64,
    applied: Index,
    applied_term: Term,
    config_state: ConfigState,
    last_snapshot_index: Index,
}

impl<S: StateMachine> ApplyWorker<S> {
    pub(crate) fn new(
        logger: slog::Logger,
        state_machine: S,
        receiver: mpsc::Receiver<ApplyBatch>,
        registry: ProposalRegistry,
        actor_client: WeakActorClient,
        snapshots: Arc<SnapshotManager>,
        applied_publisher: watch::Sender<Index>,
        config: ApplyWorkerConfig,
    ) -> Self {
        ApplyWorker {
            logger,
            state_machine,
            receiver,
            registry,
            actor_client,
            snapshots,
            applied_publisher,
            snapshot_threshold: config.snapshot_threshold,
            applied: config.applied,
            applied_term: config.applied_term,
            config_state: config.config_state,
            last_snapshot_index: config.applied,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut registrar_alive = true;
        loop {
            let batch = tokio::select! {
                batch = self.receiver.recv() => batch,
                alive = self.registry.recv(), if registrar_alive => {
                    registrar_alive = alive;
                    continue;
                }
            };
            let batch = match batch {
                Some(batch) => batch,
                None => break,
            };

            match self.handle_batch(batch).await {
                Ok(()) => {}
                Err(ApplyError::ActorExited(_)) => break,
                Err(e) => {
                    slog::crit!(self.logger, "Apply pipeline failed: {}", e);
                    let _ = self.actor_client.fatal(e.to_string()).await;
                    break;
                }
            }
        }

        slog::info!(self.logger, "Apply worker exiting at applied index {:?}", self.applied);
    }

    async fn handle_batch(&mut self, batch: ApplyBatch) -> Result<(), ApplyError> {
        self.registry.sync();

        if let Some(snapshot) = batch.snapshot {
            self.restore(snapshot)?;
        }
        for entry in batch.entries {
            self.apply_entry(entry).await?;
        }

        let _ = self.applied_publisher.send(self.applied);
        self.actor_client.applied(self.applied).await?;

        self.maybe_snapshot().await
    }

    fn restore(&mut self, snapshot: Snapshot) -> Result<(), ApplyError> {
        if snapshot.index() <= self.applied {
            slog::debug!(
                self.logger,
                "Ignoring snapshot at {:?}, already applied {:?}",
                snapshot.index(),
                self.applied
            );
            return Ok(());
        }

        slog::info!(self.logger, "Restoring state machine from snapshot at {:?}", snapshot.index());
        self.state_machine.restore(snapshot.index(), snapshot.data.clone())?;
        self.applied = snapshot.index();
        self.applied_term = snapshot.term();
        self.last_snapshot_index = snapshot.index();
        self.config_state = snapshot.metadata.config_state;
        self.registry.resolve_unknown_through(self.applied);

        Ok(())
    }

    async fn apply_entry(&mut self, entry: LogEntry) -> Result<(), ApplyError> {
        if entry.index <= self.applied {
            slog::debug!(self.logger, "Skipping already applied entry {:?}", entry.index);
            return Ok(());
        }
        let expected = self.applied.plus(1);
        if entry.index != expected {
            return Err(ApplyError::Gap {
                expected,
                got: entry.index,
            });
        }

        let output = match entry.kind {
            EntryKind::ConfChange => {
                let change = decode_conf_change(&entry.data).map_err(|source| ApplyError::BadConfChange {
                    index: entry.index,
                    source,
                })?;
                self.config_state = self.actor_client.apply_conf_change(change).await?;
                Some(StateMachineOutput::NoData)
            }
            // No-op appended by a new leader, or an empty proposal.
            EntryKind::Normal if entry.data.is_empty() => Some(StateMachineOutput::NoData),
            EntryKind::Normal if entry.index <= self.state_machine.last_applied() => None,
            EntryKind::Normal => Some(self.state_machine.apply(entry.index, entry.data)),
        };

        self.applied = entry.index;
        self.applied_term = entry.term;
        match output {
            Some(output) => self.registry.resolve(entry.index, entry.term, output),
            None => self.registry.resolve_unknown_through(entry.index),
        }

        Ok(())
    }

    async fn maybe_snapshot(&mut self) -> Result<(), ApplyError> {
        if self.applied.distance_from(self.last_snapshot_index) < self.snapshot_threshold {
            return Ok(());
        }
        if self.state_machine.last_applied() > self.applied {
            // State is ahead of the log; a snapshot would claim less than it holds.
            return Ok(());
        }

        let data = self.state_machine.snapshot()?;
        let snapshot =
            self.snapshots
                .create_snapshot(self.applied, self.applied_term, self.config_state.clone(), data)?;
        self.last_snapshot_index = self.applied;
        self.actor_client.snapshot_created(snapshot).await?;

        Ok(())
    }
}
