mod dispatch;
mod grpc;
mod local;

pub use local::LocalNetwork;

pub(crate) use dispatch::DispatchWorker;
pub(crate) use grpc::{GrpcTransport, PeerOptions};

use crate::replica::{Message, ReplicaId};

/// Transport delivers messages to peers, best effort. `send` never blocks: a message that can't
/// be queued is dropped, and the replica finds out through its own timeouts and reports.
pub(crate) trait Transport: Send + Sync + 'static {
    fn send(&self, message: Message);

    /// Tells the transport how to reach a (new) peer. Addresses are "host:port".
    fn add_peer(&self, _replica_id: &ReplicaId, _address: &str) {}

    /// Forgets a peer that left the cluster. Messages to it are dropped from now on.
    fn remove_peer(&self, _replica_id: &ReplicaId) {}
}
