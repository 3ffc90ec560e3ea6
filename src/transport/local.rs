use crate::actor::WeakActorClient;
use crate::replica::{Message, MessageBody, ReplicaId};
use crate::transport::Transport;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// LocalNetwork connects replicas running in one process. Links can be cut to simulate
/// partitions; a cut link loses messages silently, like a real network.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    replicas: HashMap<ReplicaId, WeakActorClient>,
    // Unordered pairs that can't talk.
    cut_links: HashSet<(ReplicaId, ReplicaId)>,
}

impl NetworkState {
    fn link_is_cut(&self, a: &ReplicaId, b: &ReplicaId) -> bool {
        self.cut_links.contains(&link(a, b))
    }
}

fn link(a: &ReplicaId, b: &ReplicaId) -> (ReplicaId, ReplicaId) {
    if a < b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl LocalNetwork {
    pub fn new() -> Self {
        LocalNetwork::default()
    }

    /// Cuts every link between `replica_id` and the rest of the network.
    pub fn isolate(&self, replica_id: &str) {
        let isolated = ReplicaId::new(replica_id);
        let mut state = self.state.lock().expect("Network lock poisoned");
        let others: Vec<ReplicaId> = state.replicas.keys().filter(|id| **id != isolated).cloned().collect();
        for other in others {
            state.cut_links.insert(link(&isolated, &other));
        }
    }

    /// Splits the network into groups. Replicas talk only within their own group. Replicas not
    /// named in any group are cut off from all named ones.
    pub fn partition(&self, groups: &[&[&str]]) {
        let mut state = self.state.lock().expect("Network lock poisoned");
        let group_of: HashMap<ReplicaId, usize> = groups
            .iter()
            .enumerate()
            .flat_map(|(i, group)| group.iter().map(move |id| (ReplicaId::new(*id), i)))
            .collect();

        let ids: Vec<ReplicaId> = state.replicas.keys().cloned().collect();
        for a in &ids {
            for b in &ids {
                if a < b && group_of.get(a) != group_of.get(b) {
                    state.cut_links.insert(link(a, b));
                }
            }
        }
    }

    /// Restores every link.
    pub fn heal(&self) {
        self.state.lock().expect("Network lock poisoned").cut_links.clear();
    }

    pub(crate) fn register(&self, replica_id: ReplicaId, actor_client: WeakActorClient) {
        self.state
            .lock()
            .expect("Network lock poisoned")
            .replicas
            .insert(replica_id, actor_client);
    }

    pub(crate) fn transport(&self, my_replica_id: ReplicaId, my_actor_client: WeakActorClient) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            my_replica_id,
            my_actor_client,
        }
    }
}

/// One replica's view of a `LocalNetwork`.
pub(crate) struct LocalTransport {
    network: LocalNetwork,
    my_replica_id: ReplicaId,
    my_actor_client: WeakActorClient,
}

impl Transport for LocalTransport {
    fn send(&self, message: Message) {
        let destination = {
            let state = self.network.state.lock().expect("Network lock poisoned");
            if state.link_is_cut(&self.my_replica_id, &message.to) {
                None
            } else {
                state.replicas.get(&message.to).cloned()
            }
        };

        let is_snapshot = matches!(message.body, MessageBody::InstallSnapshot { .. });
        let peer = message.to.clone();
        let delivered = match destination {
            Some(destination) => destination.try_step(message).is_ok(),
            None => false,
        };

        if !delivered {
            let _ = self.my_actor_client.try_report_unreachable(peer.clone());
        }
        if is_snapshot {
            let _ = self.my_actor_client.try_report_snapshot(peer, delivered);
        }
    }
}
