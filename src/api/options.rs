use serde::Deserialize;
use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning knobs for a replica. Anything left `None` gets a default.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaftOptions {
    /// Duration of one logical tick. Election and heartbeat timeouts are counted in ticks.
    #[serde(with = "optional_millis")]
    pub tick_duration: Option<Duration>,
    pub heartbeat_ticks: Option<u32>,
    /// Followers time out after a random number of ticks in `[election_ticks, 2 * election_ticks)`.
    pub election_ticks: Option<u32>,
    pub check_quorum: Option<bool>,
    pub max_entries_per_append: Option<usize>,
    pub max_inflight_appends: Option<usize>,

    /// Applied entries between snapshots.
    pub snapshot_threshold: Option<u64>,
    /// Entries kept in memory behind a snapshot for slow followers.
    pub snapshot_catchup_entries: Option<u64>,
    pub snapshot_retention: Option<usize>,
    pub wal_segment_size_bytes: Option<u64>,
    /// Only turn off for tests and benchmarks.
    pub wal_sync_writes: Option<bool>,

    pub event_queue_capacity: Option<usize>,
    pub peer_queue_capacity: Option<usize>,
    #[serde(with = "optional_millis")]
    pub peer_retry_initial_backoff: Option<Duration>,
    #[serde(with = "optional_millis")]
    pub peer_retry_max_backoff: Option<Duration>,
    pub peer_max_send_attempts: Option<u32>,

    /// Seeds election jitter, for reproducible tests.
    pub rng_seed: Option<u64>,
}

impl RaftOptions {
    /// Fills every unset field of `self` from `other`.
    pub fn or(self, other: RaftOptions) -> RaftOptions {
        RaftOptions {
            tick_duration: self.tick_duration.or(other.tick_duration),
            heartbeat_ticks: self.heartbeat_ticks.or(other.heartbeat_ticks),
            election_ticks: self.election_ticks.or(other.election_ticks),
            check_quorum: self.check_quorum.or(other.check_quorum),
            max_entries_per_append: self.max_entries_per_append.or(other.max_entries_per_append),
            max_inflight_appends: self.max_inflight_appends.or(other.max_inflight_appends),
            snapshot_threshold: self.snapshot_threshold.or(other.snapshot_threshold),
            snapshot_catchup_entries: self.snapshot_catchup_entries.or(other.snapshot_catchup_entries),
            snapshot_retention: self.snapshot_retention.or(other.snapshot_retention),
            wal_segment_size_bytes: self.wal_segment_size_bytes.or(other.wal_segment_size_bytes),
            wal_sync_writes: self.wal_sync_writes.or(other.wal_sync_writes),
            event_queue_capacity: self.event_queue_capacity.or(other.event_queue_capacity),
            peer_queue_capacity: self.peer_queue_capacity.or(other.peer_queue_capacity),
            peer_retry_initial_backoff: self.peer_retry_initial_backoff.or(other.peer_retry_initial_backoff),
            peer_retry_max_backoff: self.peer_retry_max_backoff.or(other.peer_retry_max_backoff),
            peer_max_send_attempts: self.peer_max_send_attempts.or(other.peer_max_send_attempts),
            rng_seed: self.rng_seed.or(other.rng_seed),
        }
    }
}

#[derive(Clone, Debug)]
pub(super) struct RaftOptionsValidated {
    pub tick_duration: Duration,
    pub heartbeat_ticks: u32,
    pub election_ticks: u32,
    pub check_quorum: bool,
    pub max_entries_per_append: usize,
    pub max_inflight_appends: usize,
    pub snapshot_threshold: u64,
    pub snapshot_catchup_entries: u64,
    pub snapshot_retention: usize,
    pub wal_segment_size_bytes: u64,
    pub wal_sync_writes: bool,
    pub event_queue_capacity: usize,
    pub peer_queue_capacity: usize,
    pub peer_retry_initial_backoff: Duration,
    pub peer_retry_max_backoff: Duration,
    pub peer_max_send_attempts: u32,
    pub rng_seed: Option<u64>,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.tick_duration == Duration::from_millis(0) {
            return Err("Tick duration must be non-zero");
        }
        if self.heartbeat_ticks == 0 {
            return Err("Heartbeat ticks must be non-zero");
        }
        if self.election_ticks <= self.heartbeat_ticks {
            return Err("Election ticks must be greater than heartbeat ticks");
        }
        if self.max_entries_per_append == 0 || self.max_inflight_appends == 0 {
            return Err("Append batch size and inflight limit must be non-zero");
        }
        if self.snapshot_threshold == 0 {
            return Err("Snapshot threshold must be non-zero");
        }
        if self.snapshot_retention == 0 {
            return Err("At least one snapshot must be retained");
        }
        if self.wal_segment_size_bytes < 4096 {
            return Err("WAL segments must be at least 4 KiB");
        }
        if self.event_queue_capacity == 0 || self.peer_queue_capacity == 0 {
            return Err("Queue capacities must be non-zero");
        }
        if self.peer_retry_initial_backoff > self.peer_retry_max_backoff {
            return Err("Initial peer retry backoff must not exceed the maximum backoff");
        }
        if self.peer_max_send_attempts == 0 {
            return Err("Peers must be attempted at least once");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let values = RaftOptionsValidated {
            tick_duration: options.tick_duration.unwrap_or(Duration::from_millis(100)),
            heartbeat_ticks: options.heartbeat_ticks.unwrap_or(1),
            election_ticks: options.election_ticks.unwrap_or(10),
            check_quorum: options.check_quorum.unwrap_or(true),
            max_entries_per_append: options.max_entries_per_append.unwrap_or(64),
            max_inflight_appends: options.max_inflight_appends.unwrap_or(256),
            snapshot_threshold: options.snapshot_threshold.unwrap_or(10_000),
            snapshot_catchup_entries: options.snapshot_catchup_entries.unwrap_or(1_000),
            snapshot_retention: options.snapshot_retention.unwrap_or(2),
            wal_segment_size_bytes: options.wal_segment_size_bytes.unwrap_or(64 * 1024 * 1024),
            wal_sync_writes: options.wal_sync_writes.unwrap_or(true),
            event_queue_capacity: options.event_queue_capacity.unwrap_or(1024),
            peer_queue_capacity: options.peer_queue_capacity.unwrap_or(1024),
            peer_retry_initial_backoff: options
                .peer_retry_initial_backoff
                .unwrap_or(Duration::from_millis(50)),
            peer_retry_max_backoff: options.peer_retry_max_backoff.unwrap_or(Duration::from_secs(1)),
            peer_max_send_attempts: options.peer_max_send_attempts.unwrap_or(5),
            rng_seed: options.rng_seed,
        };

        values.validate()?;
        Ok(values)
    }
}

// Durations are written as milliseconds in config files.
mod optional_millis {
    use serde::{Deserialize, Deserializer};
    use tokio::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
