use crate::commitlog::Index;
use crate::grpc::ProtoSnapshot;
use crate::replica::{encode_to_vec, snapshot_from_proto, snapshot_to_proto};
use crate::replica::{ConfigState, DecodeError, Snapshot, SnapshotMetadata, Term};
use bytes::Bytes;
use prost::Message as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SNAPSHOT_EXTENSION: &str = "snap";
const TEMP_EXTENSION: &str = "tmp";
const BROKEN_EXTENSION: &str = "broken";

// File bytes:
// 0..4 : crc of the rest of the file, big endian
// 4..  : ProtoSnapshot

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Snapshot file {path:?} is unreadable: {reason}")]
    Corrupted { path: PathBuf, reason: String },
    #[error("Snapshot decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// SnapshotManager owns the snapshot directory. Snapshot files are named
/// `{term:016x}-{index:016x}.snap` and only the newest `retention` are kept.
///
/// Both the apply pipeline (creating snapshots) and the persist worker (installing snapshots sent
/// by the leader) write here, so writes are serialized.
pub struct SnapshotManager {
    logger: slog::Logger,
    directory: PathBuf,
    retention: usize,
    write_lock: Mutex<()>,
}

impl SnapshotManager {
    pub fn open(logger: slog::Logger, directory: &Path, retention: usize) -> Result<Self, SnapshotError> {
        fs::create_dir_all(directory)?;

        // Leftovers of a crash mid-write.
        for path in list_with_extension(directory, TEMP_EXTENSION)? {
            slog::info!(logger, "Removing incomplete snapshot file {:?}", path);
            fs::remove_file(&path)?;
        }

        Ok(SnapshotManager {
            logger,
            directory: directory.to_path_buf(),
            retention: std::cmp::max(retention, 1),
            write_lock: Mutex::new(()),
        })
    }

    /// Persists a snapshot of the state machine as of `index`. The caller guarantees `index` has
    /// been applied and `data` reflects exactly the entries up to it.
    pub fn create_snapshot(
        &self,
        index: Index,
        term: Term,
        config_state: ConfigState,
        data: Bytes,
    ) -> Result<Snapshot, SnapshotError> {
        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                index,
                term,
                config_state,
            },
            data,
        };
        self.save(&snapshot)?;
        slog::info!(
            self.logger,
            "Created snapshot at {:?} (term {:?}, {} bytes)",
            index,
            term,
            snapshot.data.len()
        );

        Ok(snapshot)
    }

    /// Persists a snapshot received from the leader.
    pub fn install_snapshot(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        self.save(snapshot)?;
        slog::info!(
            self.logger,
            "Installed snapshot at {:?} (term {:?})",
            snapshot.index(),
            snapshot.term()
        );
        Ok(())
    }

    /// Returns the newest snapshot that can be read back. Files that can't be are renamed to
    /// `*.broken` and skipped.
    pub fn load_newest(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let mut candidates = self.list_snapshots()?;
        while let Some((_, _, path)) = candidates.pop() {
            match read_snapshot_file(&path) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(SnapshotError::Io(e)) => return Err(SnapshotError::Io(e)),
                Err(e) => {
                    slog::warn!(self.logger, "Skipping unreadable snapshot: {}", e);
                    fs::rename(&path, path.with_extension(BROKEN_EXTENSION))?;
                }
            }
        }

        Ok(None)
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let _guard = self.write_lock.lock().expect("Snapshot write lock poisoned");

        let payload = encode_to_vec(&snapshot_to_proto(snapshot));
        let mut contents = Vec::with_capacity(4 + payload.len());
        contents.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        contents.extend_from_slice(&payload);

        let final_path = self.snapshot_path(snapshot.term(), snapshot.index());
        let temp_path = final_path.with_extension(TEMP_EXTENSION);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(&contents)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &final_path)?;
        fs::File::open(&self.directory)?.sync_all()?;

        self.purge()
    }

    fn purge(&self) -> Result<(), SnapshotError> {
        let snapshots = self.list_snapshots()?;
        if snapshots.len() <= self.retention {
            return Ok(());
        }

        let excess = snapshots.len() - self.retention;
        for (_, index, path) in snapshots.into_iter().take(excess) {
            slog::debug!(self.logger, "Purging old snapshot at {:?}", index);
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn snapshot_path(&self, term: Term, index: Index) -> PathBuf {
        self.directory.join(format!(
            "{:016x}-{:016x}.{}",
            term.as_u64(),
            index.as_u64(),
            SNAPSHOT_EXTENSION
        ))
    }

    /// Oldest first, ordered by (index, term).
    fn list_snapshots(&self) -> Result<Vec<(Term, Index, PathBuf)>, SnapshotError> {
        let mut snapshots: Vec<_> = list_with_extension(&self.directory, SNAPSHOT_EXTENSION)?
            .into_iter()
            .filter_map(|path| {
                let (term, index) = parse_snapshot_name(&path)?;
                Some((term, index, path))
            })
            .collect();
        snapshots.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
        Ok(snapshots)
    }
}

fn parse_snapshot_name(path: &Path) -> Option<(Term, Index)> {
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.splitn(2, '-');
    let term = u64::from_str_radix(parts.next()?, 16).ok()?;
    let index = u64::from_str_radix(parts.next()?, 16).ok()?;
    Some((Term::new(term), Index::new(index)))
}

fn list_with_extension(directory: &Path, extension: &str) -> Result<Vec<PathBuf>, io::Error> {
    let mut paths = Vec::new();
    for dir_entry in fs::read_dir(directory)? {
        let path = dir_entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            paths.push(path);
        }
    }
    Ok(paths)
}

fn read_snapshot_file(path: &Path) -> Result<Snapshot, SnapshotError> {
    let contents = fs::read(path)?;
    let corrupted = |reason: &str| SnapshotError::Corrupted {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if contents.len() < 4 {
        return Err(corrupted("file too short"));
    }
    let stored_crc = u32::from_be_bytes([contents[0], contents[1], contents[2], contents[3]]);
    if crc32fast::hash(&contents[4..]) != stored_crc {
        return Err(corrupted("checksum mismatch"));
    }

    let proto = ProtoSnapshot::decode(&contents[4..]).map_err(DecodeError::from)?;
    Ok(snapshot_from_proto(proto)?)
}
