use clap::Parser;
use coordkv::{
    try_create_raft_client, KvStore, RaftClientConfig, RaftElectionState, RaftEvent, RaftMemberInfo,
    RaftMemberInfoBlob, RaftOptions, RaftTransportConfig,
};
use serde::Deserialize;
use slog::Drain;
use std::error::Error;
use std::fs;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

/// Runs one coordkv replica. Every flag can also be set through its COORDKV_* environment
/// variable; flags win over the environment, which wins over the config file.
#[derive(Debug, Parser)]
#[command(name = "coordkv", version)]
struct Cli {
    /// This replica's ID. Must appear in --member.
    #[arg(long, env = "COORDKV_ID")]
    id: String,

    /// Cluster members as `id=ip:port`, this replica included. Repeat or comma-separate.
    #[arg(long = "member", env = "COORDKV_MEMBERS", value_delimiter = ',', required = true, value_parser = parse_member)]
    members: Vec<RaftMemberInfo>,

    /// Directory holding the WAL and snapshots.
    #[arg(long, env = "COORDKV_DATA_DIR")]
    data_dir: PathBuf,

    /// Join a running cluster instead of bootstrapping one from --member.
    #[arg(long, env = "COORDKV_JOIN")]
    join: bool,

    /// TOML file with a [raft] table of options.
    #[arg(long, env = "COORDKV_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "COORDKV_LOG_LEVEL", default_value = "info", value_parser = parse_level)]
    log_level: slog::Level,

    #[arg(long, env = "COORDKV_TICK_MS")]
    tick_ms: Option<u64>,

    #[arg(long, env = "COORDKV_HEARTBEAT_TICKS")]
    heartbeat_ticks: Option<u32>,

    #[arg(long, env = "COORDKV_ELECTION_TICKS")]
    election_ticks: Option<u32>,

    #[arg(long, env = "COORDKV_SNAPSHOT_THRESHOLD")]
    snapshot_threshold: Option<u64>,

    #[arg(long, env = "COORDKV_WAL_SEGMENT_BYTES")]
    wal_segment_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    raft: RaftOptions,
}

impl Cli {
    fn raft_options(&self) -> RaftOptions {
        RaftOptions {
            tick_duration: self.tick_ms.map(Duration::from_millis),
            heartbeat_ticks: self.heartbeat_ticks,
            election_ticks: self.election_ticks,
            snapshot_threshold: self.snapshot_threshold,
            wal_segment_size_bytes: self.wal_segment_bytes,
            ..RaftOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let logger = create_root_logger(&cli.id, cli.log_level);

    let file_config = match &cli.config {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };
    let options = cli.raft_options().or(file_config.raft);

    let (state_machine, _reader) = KvStore::new(logger.new(slog::o!("Component" => "KvStore")));
    let config = RaftClientConfig {
        my_replica_id: cli.id.clone(),
        cluster_members: cli.members.clone(),
        data_directory: cli.data_dir.clone(),
        info_logger: logger.clone(),
        options,
        transport: RaftTransportConfig::Grpc,
        join_existing_cluster: cli.join,
    };
    let client = try_create_raft_client(config, state_machine).await?;

    let mut event_listener = client.event_listener.clone();
    let event_logger = logger.clone();
    tokio::spawn(async move {
        while let Some(RaftEvent::Election(event)) = event_listener.next_event().await {
            match event.state {
                RaftElectionState::Leader => slog::info!(event_logger, "Became leader in term {}", event.term),
                RaftElectionState::Follower { leader_replica_id } => {
                    slog::info!(event_logger, "Following {} in term {}", leader_replica_id, event.term)
                }
                RaftElectionState::Candidate | RaftElectionState::FollowerNoLeader => {}
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    slog::info!(logger, "Interrupted. Shutting down.");
    client.shutdown().await;

    Ok(())
}

fn load_file_config(path: &Path) -> Result<FileConfig, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

fn parse_member(raw: &str) -> Result<RaftMemberInfo, String> {
    let (id, addr) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected `id=ip:port`, got '{}'", raw))?;
    let addr: SocketAddrV4 = addr.parse().map_err(|e| format!("bad address '{}': {}", addr, e))?;

    Ok(RaftMemberInfo {
        replica_id: id.to_string(),
        ip_addr: *addr.ip(),
        raft_internal_rpc_port: addr.port(),
        peer_redirect_info_blob: RaftMemberInfoBlob::default(),
    })
}

fn parse_level(raw: &str) -> Result<slog::Level, String> {
    raw.parse().map_err(|_| format!("unknown log level '{}'", raw))
}

fn create_root_logger(replica_id: &str, level: slog::Level) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();

    slog::Logger::root(drain, slog::o!("ReplicaId" => replica_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parses_members() {
        let member = parse_member("a=127.0.0.1:7001").unwrap();
        assert_eq!(member.replica_id, "a");
        assert_eq!(member.ip_addr, Ipv4Addr::LOCALHOST);
        assert_eq!(member.raft_internal_rpc_port, 7001);

        assert!(parse_member("127.0.0.1:7001").is_err());
        assert!(parse_member("a=localhost").is_err());
    }

    #[test]
    fn flags_override_file() {
        let cli = Cli::try_parse_from(&[
            "coordkv",
            "--id",
            "a",
            "--member",
            "a=127.0.0.1:7001,b=127.0.0.1:7002",
            "--data-dir",
            "/tmp/a",
            "--election-ticks",
            "20",
        ])
        .unwrap();
        assert_eq!(cli.members.len(), 2);

        let file: FileConfig = toml::from_str("[raft]\nelection_ticks = 12\nheartbeat_ticks = 3\n").unwrap();
        let options = cli.raft_options().or(file.raft);
        assert_eq!(options.election_ticks, Some(20));
        assert_eq!(options.heartbeat_ticks, Some(3));
    }

    fn parse_with_required(extra: &[&str]) -> Result<Cli, clap::Error> {
        let mut args = vec!["coordkv", "--id", "a", "--member", "a=127.0.0.1:7001", "--data-dir", "/tmp/a"];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args)
    }

    // Environment variables are process wide, so every case that sets them lives here.
    #[test]
    fn environment_sits_between_flags_and_defaults() {
        std::env::set_var("COORDKV_ELECTION_TICKS", "30");
        let from_env = parse_with_required(&[]).unwrap();
        assert_eq!(from_env.raft_options().election_ticks, Some(30));

        let from_flag = parse_with_required(&["--election-ticks", "25"]).unwrap();
        assert_eq!(from_flag.raft_options().election_ticks, Some(25));

        // The environment also beats the config file.
        let file: FileConfig = toml::from_str("[raft]\nelection_ticks = 12\n").unwrap();
        assert_eq!(from_env.raft_options().or(file.raft).election_ticks, Some(30));

        std::env::set_var("COORDKV_ELECTION_TICKS", "100 # ms");
        assert!(parse_with_required(&[]).is_err());
        assert!(parse_with_required(&["--election-ticks", "25"]).is_ok());

        std::env::remove_var("COORDKV_ELECTION_TICKS");
        assert_eq!(parse_with_required(&[]).unwrap().raft_options().election_ticks, None);
    }

    #[test]
    fn rejects_unknown_file_keys() {
        assert!(toml::from_str::<FileConfig>("[raft]\nelection_tick = 12\n").is_err());
    }
}
