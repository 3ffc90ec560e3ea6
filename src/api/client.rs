use crate::actor::ActorClient;
use crate::api::event_bus::RaftEventListener;
use crate::api::replicated_log::ReplicatedLog;
use tokio::task::JoinHandle;

/// RaftClient is the application's handle to a running replica. The replica keeps running until
/// `shutdown()` is called or every clone of `replicated_log` is dropped.
pub struct RaftClient {
    pub replicated_log: ReplicatedLog,
    pub event_listener: RaftEventListener,
    pub(crate) actor_client: ActorClient,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

impl RaftClient {
    /// Stops the replica and waits for its tasks to finish. Proposals still pending resolve with
    /// an error.
    pub async fn shutdown(self) {
        // Already stopped if this fails.
        let _ = self.actor_client.shutdown().await;
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
