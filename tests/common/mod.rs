#![allow(dead_code)]

use bytes::Bytes;
use coordkv::{
    EnqueueEntryError, KvCommand, KvReader, KvStore, LocalNetwork, ProposeEntryError, RaftClient, RaftClientConfig,
    RaftMemberInfo, RaftMemberInfoBlob, RaftOptions, RaftTransportConfig, Role,
};
use slog::Drain;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(20);
const POLL: Duration = Duration::from_millis(20);

pub struct TestNode {
    pub client: RaftClient,
    pub reader: KvReader,
}

/// A cluster of replicas in this process, connected by a `LocalNetwork`.
pub struct TestCluster {
    pub network: LocalNetwork,
    pub nodes: HashMap<String, TestNode>,
    pub options: RaftOptions,
    data_root: tempfile::TempDir,
    bootstrap_members: Vec<RaftMemberInfo>,
    errors_logged: Arc<AtomicUsize>,
}

impl TestCluster {
    pub async fn start(num_members: usize) -> TestCluster {
        TestCluster::start_with_options(num_members, fast_options()).await
    }

    pub async fn start_with_options(num_members: usize, options: RaftOptions) -> TestCluster {
        let bootstrap_members = (0..num_members).map(|i| member_info(&repl_id(i), i)).collect();
        let mut cluster = TestCluster {
            network: LocalNetwork::new(),
            nodes: HashMap::new(),
            options,
            data_root: tempfile::tempdir().expect("Failed to create temp dir"),
            bootstrap_members,
            errors_logged: Arc::new(AtomicUsize::new(0)),
        };

        for i in 0..num_members {
            cluster.start_node(&repl_id(i)).await;
        }

        cluster
    }

    /// Starts (or restarts) a bootstrap member from its data directory.
    pub async fn start_node(&mut self, id: &str) {
        let members = self.bootstrap_members.clone();
        self.start_node_with(id, members, false).await;
    }

    /// Starts a replica that waits to be added by the running cluster.
    pub async fn start_joining_node(&mut self, id: &str) -> RaftMemberInfo {
        let me = member_info(id, 100 + self.nodes.len());
        let mut members = self.bootstrap_members.clone();
        members.push(me.clone());
        self.start_node_with(id, members, true).await;

        me
    }

    async fn start_node_with(&mut self, id: &str, cluster_members: Vec<RaftMemberInfo>, join_existing_cluster: bool) {
        let logger = counting_test_logger(id, self.errors_logged.clone());
        let (state_machine, reader) = KvStore::new(logger.clone());
        let config = RaftClientConfig {
            my_replica_id: id.to_string(),
            cluster_members,
            data_directory: self.data_dir(id),
            info_logger: logger,
            options: self.options.clone(),
            transport: RaftTransportConfig::Local(self.network.clone()),
            join_existing_cluster,
        };

        let client = coordkv::try_create_raft_client(config, state_machine)
            .await
            .expect("Failed to start replica");
        self.nodes.insert(id.to_string(), TestNode { client, reader });
    }

    pub async fn stop_node(&mut self, id: &str) {
        let node = self.nodes.remove(id).expect("No such node");
        node.client.shutdown().await;
    }

    /// Records logged at Error level or above, by any node, so far.
    pub fn errors_logged(&self) -> usize {
        self.errors_logged.load(Ordering::SeqCst)
    }

    pub fn data_dir(&self, id: &str) -> PathBuf {
        self.data_root.path().join(id)
    }

    pub fn node(&self, id: &str) -> &TestNode {
        self.nodes.get(id).expect("No such node")
    }

    /// Waits until one of `among` is leader and the others agree on it.
    pub async fn wait_for_leader(&self, among: &[&str]) -> String {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            if let Some(leader) = self.agreed_leader(among).await {
                return leader;
            }
            assert!(Instant::now() < deadline, "Timeout waiting for a leader among {:?}", among);
            tokio::time::sleep(POLL).await;
        }
    }

    async fn agreed_leader(&self, among: &[&str]) -> Option<String> {
        let mut leader = None;
        let mut leader_term = 0;
        for id in among {
            let status = self.node(id).client.replicated_log.status().await.ok()?;
            if status.soft_state.role == Role::Leader {
                leader = Some(id.to_string());
                leader_term = status.soft_state.term.as_u64();
            }
        }
        let leader = leader?;

        for id in among {
            let status = self.node(id).client.replicated_log.status().await.ok()?;
            let agrees = status.soft_state.term.as_u64() == leader_term
                && status.soft_state.leader.map(|l| l.into_inner()) == Some(leader.clone());
            if !agrees {
                return None;
            }
        }

        Some(leader)
    }

    /// Writes through whichever of `among` is leader, retrying across elections.
    pub async fn put(&self, among: &[&str], key: &str, value: &str) {
        let command = KvCommand::Put {
            key: key.to_string(),
            value: Bytes::from(value.to_string()),
        }
        .encode();

        let deadline = Instant::now() + TIMEOUT;
        loop {
            let leader = self.wait_for_leader(among).await;
            match self.node(&leader).client.replicated_log.propose(command.clone()).await {
                Ok(_) => return,
                Err(ProposeEntryError::Enqueue(EnqueueEntryError::ReplicaExited)) => {
                    panic!("Replica {} has exited", leader)
                }
                Err(e) => println!("Retrying put of {}: {}", key, e),
            }
            assert!(Instant::now() < deadline, "Timeout writing {}", key);
            tokio::time::sleep(POLL).await;
        }
    }

    /// Waits until every one of `among` has committed and applied the same index, and returns it.
    pub async fn wait_for_convergence(&self, among: &[&str]) -> u64 {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            let mut commits = Vec::new();
            for id in among {
                if let Ok(status) = self.node(id).client.replicated_log.status().await {
                    if status.applied == status.hard_state.commit {
                        commits.push(status.hard_state.commit.as_u64());
                    }
                }
            }
            if commits.len() == among.len() && commits.iter().all(|commit| *commit == commits[0]) {
                return commits[0];
            }
            assert!(Instant::now() < deadline, "Timeout waiting for {:?} to converge", among);
            tokio::time::sleep(POLL).await;
        }
    }

    pub async fn wait_for_value(&self, id: &str, key: &str, expected: &str) {
        let deadline = Instant::now() + TIMEOUT;
        let expected = Bytes::from(expected.to_string());
        loop {
            if self.node(id).reader.get(key) == Some(expected.clone()) {
                return;
            }
            assert!(Instant::now() < deadline, "Timeout waiting for {} on {}", key, id);
            tokio::time::sleep(POLL).await;
        }
    }
}

pub fn fast_options() -> RaftOptions {
    RaftOptions {
        tick_duration: Some(Duration::from_millis(10)),
        heartbeat_ticks: Some(2),
        election_ticks: Some(15),
        wal_sync_writes: Some(false),
        wal_segment_size_bytes: Some(64 * 1024),
        ..RaftOptions::default()
    }
}

pub fn member_info(id: &str, n: usize) -> RaftMemberInfo {
    RaftMemberInfo {
        replica_id: id.to_string(),
        ip_addr: Ipv4Addr::LOCALHOST,
        raft_internal_rpc_port: 0,
        peer_redirect_info_blob: RaftMemberInfoBlob::new(4000 + n as u128),
    }
}

pub fn repl_id(id: usize) -> String {
    format!("replica-{}", id + 1)
}

pub fn create_test_logger(replica_id: &str) -> slog::Logger {
    counting_test_logger(replica_id, Arc::new(AtomicUsize::new(0)))
}

pub fn counting_test_logger(replica_id: &str, errors: Arc<AtomicUsize>) -> slog::Logger {
    let decorator = slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, slog::Level::Info).fuse();
    let drain = ErrorCounter { drain, errors };

    slog::Logger::root(drain, slog::o!("ReplicaId" => replica_id.to_string()))
}

/// Counts records at Error level or above before passing them on.
struct ErrorCounter<D> {
    drain: D,
    errors: Arc<AtomicUsize>,
}

impl<D: Drain> Drain for ErrorCounter<D> {
    type Ok = D::Ok;
    type Err = D::Err;

    fn log(&self, record: &slog::Record, values: &slog::OwnedKVList) -> Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(slog::Level::Error) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        self.drain.log(record, values)
    }
}
