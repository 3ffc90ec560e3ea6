use crate::actor::{ActorClient, PersistWorker, RealClock, ReplicaActor, Ticker};
use crate::api::client::RaftClient;
use crate::api::event_bus::RaftEventListener;
use crate::api::options::RaftOptionsValidated;
use crate::api::replicated_log::{MemberDirectory, ReplicatedLog};
use crate::api::types::RaftMemberInfo;
use crate::api::RaftOptions;
use crate::apply::{proposal_registry, ApplyWorker, ApplyWorkerConfig, StateMachine, StateMachineError};
use crate::commitlog::{Index, Wal, WalError, WalOptions};
use crate::replica::{election_state_channel, ConfigState, RecoveredState, Replica, ReplicaConfig, ReplicaId, Term};
use crate::server::RpcServer;
use crate::snapshot::{SnapshotError, SnapshotManager};
use crate::transport::{DispatchWorker, GrpcTransport, LocalNetwork, PeerOptions, Transport};
use std::collections::{BTreeSet, HashMap};
use std::convert::TryFrom;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

// Ready batches and their fan-out. The actor never has more than one batch in flight, so these
// stay nearly empty.
const WORKER_QUEUE_CAPACITY: usize = 64;

pub struct RaftClientConfig {
    pub my_replica_id: String,
    /// Must include this replica, whose entry gives the address to listen on.
    pub cluster_members: Vec<RaftMemberInfo>,
    // A directory where we can create files and sub-directories for the WAL and snapshots.
    pub data_directory: PathBuf,
    pub info_logger: slog::Logger,
    pub options: RaftOptions,
    pub transport: RaftTransportConfig,
    /// Start with no membership and wait to be added by the existing cluster, instead of
    /// bootstrapping a new cluster out of `cluster_members`.
    pub join_existing_cluster: bool,
}

pub enum RaftTransportConfig {
    /// Serve and send over gRPC, at the addresses in `cluster_members`.
    Grpc,
    /// Talk to replicas in this process only.
    Local(LocalNetwork),
}

#[derive(Debug, thiserror::Error)]
pub enum RaftClientCreationError {
    #[error("Invalid cluster info: {0}")]
    InvalidClusterInfo(String),
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),
    #[error("Log initialization failure: {0}")]
    LogInitialization(#[from] WalError),
    #[error("Snapshot initialization failure: {0}")]
    SnapshotInitialization(#[from] SnapshotError),
    #[error("Failed to restore state machine: {0}")]
    StateMachineRestore(#[from] StateMachineError),
    #[error("my replica ID not in cluster config")]
    MeNotInCluster,
}

/// Recovers a replica from `config.data_directory` and starts it. The state machine is expected
/// to be durable on its own or empty; it's restored from the newest snapshot if it is behind it.
pub async fn try_create_raft_client<S: StateMachine>(
    config: RaftClientConfig,
    mut state_machine: S,
) -> Result<RaftClient, RaftClientCreationError> {
    let root_logger = config.info_logger;
    let options = RaftOptionsValidated::try_from(config.options)
        .map_err(|e| RaftClientCreationError::IllegalClientOptions(e.to_string()))?;

    validate_members(&config.cluster_members)?;
    let my_member_info = my_info(&config.my_replica_id, &config.cluster_members)
        .ok_or(RaftClientCreationError::MeNotInCluster)?
        .clone();
    let my_replica_id = ReplicaId::new(config.my_replica_id);

    // ------- Recover durable state -------

    let snapshots = Arc::new(SnapshotManager::open(
        root_logger.new(slog::o!("Component" => "Snapshots")),
        &config.data_directory.join("snap"),
        options.snapshot_retention,
    )?);
    let snapshot = snapshots.load_newest()?;
    let (snapshot_index, snapshot_term) = match &snapshot {
        Some(s) => (s.index(), s.term()),
        None => (Index::zero(), Term::default()),
    };

    let (wal, wal_contents) = Wal::open(
        root_logger.new(slog::o!("Component" => "Wal")),
        &config.data_directory.join("wal"),
        WalOptions {
            segment_size_bytes: options.wal_segment_size_bytes,
            sync_writes: options.wal_sync_writes,
        },
    )?;
    let hard_state = wal_contents.hard_state.clone();
    let entries = wal_contents.entries_after(snapshot_index)?;

    if let Some(snapshot) = &snapshot {
        if state_machine.last_applied() < snapshot.index() {
            slog::info!(root_logger, "Restoring state machine from snapshot at {:?}", snapshot.index());
            state_machine.restore(snapshot.index(), snapshot.data.clone())?;
        }
    }

    let initial_config = if config.join_existing_cluster {
        ConfigState::default()
    } else {
        ConfigState::with_voters(
            config
                .cluster_members
                .iter()
                .map(|member| ReplicaId::new(member.replica_id.clone())),
        )
    };
    let applied_config = match &snapshot {
        Some(s) => s.metadata.config_state.clone(),
        None => initial_config.clone(),
    };

    slog::info!(
        root_logger,
        "Recovered: snapshot at {:?}, {} log entries, {:?}",
        snapshot_index,
        entries.len(),
        hard_state
    );

    let replica = Replica::new(
        ReplicaConfig {
            logger: root_logger.new(slog::o!("Component" => "Replica")),
            my_replica_id: my_replica_id.clone(),
            heartbeat_ticks: options.heartbeat_ticks,
            election_ticks: options.election_ticks,
            check_quorum: options.check_quorum,
            max_entries_per_append: options.max_entries_per_append,
            max_inflight_appends: options.max_inflight_appends,
            snapshot_catchup_entries: options.snapshot_catchup_entries,
            rng_seed: options.rng_seed,
        },
        RecoveredState {
            hard_state,
            snapshot,
            entries,
            initial_config,
        },
    );

    // ------- Wire up tasks -------

    let (election_notifier, election_listener) = election_state_channel(replica.soft_state());
    let (actor_client, actor_queue_rx) = ActorClient::new(options.event_queue_capacity);
    let (registrar, registry) = proposal_registry();
    let (applied_tx, applied_rx) = watch::channel(snapshot_index);
    let (persist_tx, persist_rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
    let (dispatch_tx, dispatch_rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
    let (apply_tx, apply_rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);

    let mut tasks = Vec::new();
    let (transport, server_shutdown): (Arc<dyn Transport>, _) = match config.transport {
        RaftTransportConfig::Grpc => {
            let transport = GrpcTransport::new(
                root_logger.new(slog::o!("Component" => "Transport")),
                PeerOptions {
                    queue_capacity: options.peer_queue_capacity,
                    initial_backoff: options.peer_retry_initial_backoff,
                    max_backoff: options.peer_retry_max_backoff,
                    max_send_attempts: options.peer_max_send_attempts,
                },
                actor_client.weak(),
            );
            for member in &config.cluster_members {
                if member.replica_id != my_replica_id.as_str() {
                    let peer_id = ReplicaId::new(member.replica_id.clone());
                    transport.add_peer(&peer_id, &member.raft_rpc_addr().to_string());
                }
            }

            let (shutdown_handle, shutdown_signal) = RpcServer::shutdown_handle();
            let server = RpcServer::new(
                root_logger.new(slog::o!("Component" => "RpcServer")),
                my_replica_id.clone(),
                actor_client.weak(),
            );
            tasks.push(tokio::spawn(server.run(my_member_info.raft_rpc_addr(), shutdown_signal)));

            let transport: Arc<dyn Transport> = Arc::new(transport);
            (transport, Some(shutdown_handle))
        }
        RaftTransportConfig::Local(network) => {
            network.register(my_replica_id.clone(), actor_client.weak());
            let transport: Arc<dyn Transport> = Arc::new(network.transport(my_replica_id.clone(), actor_client.weak()));
            (transport, None)
        }
    };

    let persist_worker = PersistWorker::new(
        root_logger.new(slog::o!("Component" => "PersistWorker")),
        persist_rx,
        wal,
        snapshots.clone(),
        dispatch_tx,
        apply_tx,
        actor_client.weak(),
    );
    let apply_worker = ApplyWorker::new(
        root_logger.new(slog::o!("Component" => "ApplyWorker")),
        state_machine,
        apply_rx,
        registry,
        actor_client.weak(),
        snapshots,
        applied_tx,
        ApplyWorkerConfig {
            snapshot_threshold: options.snapshot_threshold,
            applied: snapshot_index,
            applied_term: snapshot_term,
            config_state: applied_config,
        },
    );
    let dispatch_worker = DispatchWorker::new(
        root_logger.new(slog::o!("Component" => "DispatchWorker")),
        dispatch_rx,
        transport.clone(),
    );
    let ticker = Ticker::new(
        root_logger.new(slog::o!("Component" => "Ticker")),
        options.tick_duration,
        actor_client.weak(),
        RealClock,
    );
    let replica_actor = ReplicaActor::new(
        root_logger.new(slog::o!("Component" => "ReplicaActor")),
        actor_queue_rx,
        replica,
        persist_tx,
        registrar,
        transport,
        election_notifier,
        options.election_ticks,
        server_shutdown,
    );

    tasks.push(tokio::spawn(replica_actor.run_event_loop()));
    tasks.push(tokio::spawn(persist_worker.run()));
    tasks.push(tokio::spawn(apply_worker.run()));
    tasks.push(tokio::spawn(dispatch_worker.run()));
    tasks.push(tokio::spawn(ticker.run()));

    let members: MemberDirectory = Arc::new(Mutex::new(
        config
            .cluster_members
            .into_iter()
            .map(|member| (member.replica_id.clone(), member))
            .collect::<HashMap<_, _>>(),
    ));

    Ok(RaftClient {
        replicated_log: ReplicatedLog::new(actor_client.clone(), applied_rx, members),
        event_listener: RaftEventListener::new(election_listener),
        actor_client,
        tasks,
    })
}

fn validate_members(cluster_members: &[RaftMemberInfo]) -> Result<(), RaftClientCreationError> {
    let mut seen = BTreeSet::new();
    for member in cluster_members {
        if member.replica_id.is_empty() {
            return Err(RaftClientCreationError::InvalidClusterInfo(
                "Replica IDs must be non-empty".to_string(),
            ));
        }
        if !seen.insert(member.replica_id.as_str()) {
            return Err(RaftClientCreationError::InvalidClusterInfo(format!(
                "Duplicate replica ID {}",
                member.replica_id
            )));
        }
    }

    Ok(())
}

fn my_info<'a>(my_replica_id: &str, cluster_members: &'a [RaftMemberInfo]) -> Option<&'a RaftMemberInfo> {
    cluster_members
        .iter()
        .find(|member_info| member_info.replica_id == my_replica_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RaftMemberInfoBlob;
    use std::net::Ipv4Addr;

    fn member(id: &str) -> RaftMemberInfo {
        RaftMemberInfo {
            replica_id: id.to_string(),
            ip_addr: Ipv4Addr::LOCALHOST,
            raft_internal_rpc_port: 9000,
            peer_redirect_info_blob: RaftMemberInfoBlob::default(),
        }
    }

    #[test]
    fn rejects_duplicate_members() {
        assert!(validate_members(&[member("a"), member("b")]).is_ok());
        assert!(matches!(
            validate_members(&[member("a"), member("a")]),
            Err(RaftClientCreationError::InvalidClusterInfo(_))
        ));
        assert!(validate_members(&[member("")]).is_err());
    }

    #[test]
    fn finds_my_info() {
        let members = vec![member("a"), member("b")];
        assert_eq!(my_info("b", &members), Some(&members[1]));
        assert_eq!(my_info("z", &members), None);
    }
}
