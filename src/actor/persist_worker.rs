use crate::actor::client::{ActorExited, WeakActorClient};
use crate::apply::ApplyBatch;
use crate::commitlog::{Index, Wal, WalError};
use crate::replica::{Message, ReadyBatch};
use crate::snapshot::{SnapshotError, SnapshotManager};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug)]
pub(crate) enum PersistTask {
    Ready(ReadyBatch),
    /// Log storage up to this index is covered by a snapshot. Advisory.
    ReleaseLog(Index),
}

#[derive(Debug, thiserror::Error)]
enum PersistError {
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("{0} worker has exited")]
    WorkerExited(&'static str),
    #[error(transparent)]
    ActorExited(#[from] ActorExited),
}

/// PersistWorker makes each ready batch durable, then fans it out:
///
/// 1. installed snapshot to disk, and the WAL reset behind it
/// 2. entries and hard state to the WAL (fsync)
/// 3. messages to the dispatch worker
/// 4. snapshot and committed entries to the apply worker
/// 5. ack back to the actor
///
/// Any storage failure is fatal to the replica.
pub(crate) struct PersistWorker {
    logger: slog::Logger,
    receiver: mpsc::Receiver<PersistTask>,
    wal: Wal,
    snapshots: Arc<SnapshotManager>,
    dispatch_queue: mpsc::Sender<Vec<Message>>,
    apply_queue: mpsc::Sender<ApplyBatch>,
    actor_client: WeakActorClient,
}

impl PersistWorker {
    pub(crate) fn new(
        logger: slog::Logger,
        receiver: mpsc::Receiver<PersistTask>,
        wal: Wal,
        snapshots: Arc<SnapshotManager>,
        dispatch_queue: mpsc::Sender<Vec<Message>>,
        apply_queue: mpsc::Sender<ApplyBatch>,
        actor_client: WeakActorClient,
    ) -> Self {
        PersistWorker {
            logger,
            receiver,
            wal,
            snapshots,
            dispatch_queue,
            apply_queue,
            actor_client,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(task) = self.receiver.recv().await {
            match task {
                PersistTask::Ready(batch) => match self.persist(batch).await {
                    Ok(()) => {}
                    Err(PersistError::ActorExited(_)) | Err(PersistError::WorkerExited(_)) => break,
                    Err(e) => {
                        slog::crit!(self.logger, "Failed to persist ready batch: {}", e);
                        let _ = self.actor_client.fatal(e.to_string()).await;
                        break;
                    }
                },
                PersistTask::ReleaseLog(index) => match self.wal.release_up_to(index) {
                    Ok(0) => {}
                    Ok(released) => slog::info!(
                        self.logger,
                        "Released {} WAL segment(s) covered by snapshot through {:?}",
                        released,
                        index
                    ),
                    Err(e) => slog::error!(self.logger, "Failed to release WAL segments: {}", e),
                },
            }
        }

        slog::info!(self.logger, "Persist worker exiting. WAL last index: {:?}", self.wal.last_index());
    }

    async fn persist(&mut self, batch: ReadyBatch) -> Result<(), PersistError> {
        let ack = batch.ack();
        let ReadyBatch {
            hard_state,
            snapshot,
            entries,
            committed_entries,
            messages,
            ..
        } = batch;

        if let Some(snapshot) = &snapshot {
            self.snapshots.install_snapshot(snapshot)?;
            self.wal.reset_to(snapshot.index(), snapshot.term())?;
        }
        if !entries.is_empty() || hard_state.is_some() {
            self.wal.append(&entries, hard_state.as_ref())?;
        }

        if !messages.is_empty() {
            self.dispatch_queue
                .send(messages)
                .await
                .map_err(|_| PersistError::WorkerExited("Dispatch"))?;
        }
        if snapshot.is_some() || !committed_entries.is_empty() {
            self.apply_queue
                .send(ApplyBatch {
                    snapshot,
                    entries: committed_entries,
                })
                .await
                .map_err(|_| PersistError::WorkerExited("Apply"))?;
        }

        self.actor_client.ready_processed(ack).await?;
        Ok(())
    }
}
