use crate::commitlog::record::{encode_record, read_record, ReadOutcome, Record};
use crate::commitlog::segment::{list_segments, sync_directory, SegmentInfo};
use crate::commitlog::Index;
use crate::replica::{HardState, LogEntry, Term};
use std::fs::{self, File, OpenOptions};
use std::cmp;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

// Unit of atomic writes to disk. A write cut short by a crash leaves whole sectors unwritten.
const SECTOR_SIZE: usize = 512;

#[derive(Clone, Debug)]
pub struct WalOptions {
    /// A segment is closed and a new one started once it reaches this size.
    pub segment_size_bytes: u64,
    /// fsync after every write batch. Only disable for tests.
    pub sync_writes: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL corrupted in {path:?} at offset {offset}: {reason}")]
    Corrupted { path: PathBuf, offset: u64, reason: String },
    #[error("WAL is inconsistent with the latest snapshot: {0}")]
    Inconsistent(String),
}

/// What replaying the WAL produced.
#[derive(Debug, Default)]
pub struct WalContents {
    pub hard_state: HardState,
    /// Surviving log entries, contiguous.
    pub entries: Vec<LogEntry>,
    /// Latest point the log was reset to by a snapshot install.
    pub reset: Option<(Index, Term)>,
}

impl WalContents {
    /// Returns the entries that follow a snapshot at `snapshot_index` (zero if there's no
    /// snapshot), checking that they continue it without a gap.
    pub fn entries_after(self, snapshot_index: Index) -> Result<Vec<LogEntry>, WalError> {
        if let Some((reset_index, _)) = self.reset {
            if reset_index > snapshot_index {
                return Err(WalError::Inconsistent(format!(
                    "log was reset to snapshot {:?} but the newest snapshot is {:?}",
                    reset_index, snapshot_index
                )));
            }
        }

        let entries: Vec<LogEntry> = self
            .entries
            .into_iter()
            .filter(|e| e.index > snapshot_index)
            .collect();
        if let Some(first) = entries.first() {
            if first.index != snapshot_index.plus(1) {
                return Err(WalError::Inconsistent(format!(
                    "log resumes at {:?} after snapshot {:?}",
                    first.index, snapshot_index
                )));
            }
        }

        Ok(entries)
    }
}

/// Wal is the durable log: an append-only sequence of segment files holding entries, hard states
/// and log resets.
///
/// Rewriting history is done by appending. An entry whose index is at or before the current last
/// index replaces that entry and everything after it when the WAL is replayed.
pub struct Wal {
    logger: slog::Logger,
    directory: PathBuf,
    options: WalOptions,
    // Oldest first. The last one is `active`.
    segments: Vec<SegmentInfo>,
    active: File,
    active_size: u64,
    last_index: Index,
    hard_state: HardState,
}

impl Wal {
    /// Opens (or creates) the WAL in `directory` and replays it.
    pub fn open(
        logger: slog::Logger,
        directory: &Path,
        options: WalOptions,
    ) -> Result<(Wal, WalContents), WalError> {
        fs::create_dir_all(directory)?;
        let mut segments = list_segments(directory)?;

        let mut replay = Replay::default();
        let segment_count = segments.len();
        for (i, segment) in segments.iter().enumerate() {
            replay.replay_segment(&logger, segment, i + 1 == segment_count)?;
        }
        let contents = replay.finish();

        let last_index = contents
            .entries
            .last()
            .map(|e| e.index)
            .or_else(|| contents.reset.map(|(index, _)| index))
            .unwrap_or_else(Index::zero);

        let (active, active_size) = match segments.last() {
            Some(segment) => {
                let file = OpenOptions::new().append(true).open(&segment.path)?;
                let size = file.metadata()?.len();
                (file, size)
            }
            None => {
                let segment = SegmentInfo::new(directory, 0, last_index.plus(1));
                let file = create_segment_file(&segment.path, directory)?;
                segments.push(segment);
                (file, 0)
            }
        };

        slog::info!(
            logger,
            "Opened WAL with {} segment(s). Last index: {:?}, hard state: {:?}",
            segments.len(),
            last_index,
            contents.hard_state
        );

        let wal = Wal {
            logger,
            directory: directory.to_path_buf(),
            options,
            segments,
            active,
            active_size,
            last_index,
            hard_state: contents.hard_state.clone(),
        };
        Ok((wal, contents))
    }

    pub fn last_index(&self) -> Index {
        self.last_index
    }

    pub fn hard_state(&self) -> &HardState {
        &self.hard_state
    }

    /// Appends `entries` and then `hard_state`, and makes them durable before returning (unless
    /// `sync_writes` is off).
    pub fn append(&mut self, entries: &[LogEntry], hard_state: Option<&HardState>) -> Result<(), WalError> {
        for entry in entries {
            self.maybe_roll()?;
            self.write_record(&Record::Entry(entry.clone()))?;
            self.last_index = entry.index;
        }
        if let Some(hard_state) = hard_state {
            self.write_record(&Record::HardState(hard_state.clone()))?;
            self.hard_state = hard_state.clone();
        }

        self.sync()
    }

    /// Discards the whole log in favor of a snapshot at `(index, term)`. The next entry appended
    /// is expected at `index + 1`.
    pub fn reset_to(&mut self, index: Index, term: Term) -> Result<(), WalError> {
        slog::info!(self.logger, "Resetting WAL to snapshot at {:?} (term {:?})", index, term);
        self.write_record(&Record::LogReset { index, term })?;
        self.last_index = index;
        self.sync()
    }

    /// Deletes closed segments that only hold entries at or before `index`. Returns how many
    /// were deleted.
    pub fn release_up_to(&mut self, index: Index) -> Result<usize, WalError> {
        let mut released = 0;
        while self.segments.len() > 1 && self.segments[1].first_index <= index.plus(1) {
            let segment = self.segments.remove(0);
            fs::remove_file(&segment.path)?;
            released += 1;
            slog::debug!(self.logger, "Released WAL segment {:?}", segment.path);
        }
        if released > 0 {
            sync_directory(&self.directory)?;
        }
        Ok(released)
    }

    fn write_record(&mut self, record: &Record) -> Result<(), WalError> {
        let mut buf = Vec::new();
        encode_record(record, &mut buf);
        self.active.write_all(&buf)?;
        self.active_size += buf.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), WalError> {
        if self.options.sync_writes {
            self.active.sync_data()?;
        }
        Ok(())
    }

    fn maybe_roll(&mut self) -> Result<(), WalError> {
        if self.active_size < self.options.segment_size_bytes {
            return Ok(());
        }

        // Close out the old segment before anything lands in the new one.
        self.sync()?;

        let seq = self.segments.last().map(|s| s.seq + 1).unwrap_or(0);
        let segment = SegmentInfo::new(&self.directory, seq, self.last_index.plus(1));
        self.active = create_segment_file(&segment.path, &self.directory)?;
        self.active_size = 0;
        slog::debug!(self.logger, "Rolled WAL to new segment {:?}", segment.path);
        self.segments.push(segment);

        // Each segment carries the latest hard state, so releasing older ones never loses it.
        let hard_state = self.hard_state.clone();
        self.write_record(&Record::HardState(hard_state))
    }
}

fn create_segment_file(path: &Path, directory: &Path) -> Result<File, io::Error> {
    let file = OpenOptions::new().create_new(true).append(true).open(path)?;
    sync_directory(directory)?;
    Ok(file)
}

#[derive(Default)]
struct Replay {
    hard_state: HardState,
    entries: Vec<LogEntry>,
    reset: Option<(Index, Term)>,
}

impl Replay {
    fn replay_segment(&mut self, logger: &slog::Logger, segment: &SegmentInfo, is_last: bool) -> Result<(), WalError> {
        let buf = fs::read(&segment.path)?;
        let mut offset = 0;

        while offset < buf.len() {
            let corrupted = |reason: String| WalError::Corrupted {
                path: segment.path.clone(),
                offset: offset as u64,
                reason,
            };

            match read_record(&buf[offset..]) {
                ReadOutcome::Record(record, len) => {
                    self.apply(record).map_err(corrupted)?;
                    offset += len;
                }
                ReadOutcome::Incomplete if is_last => {
                    return truncate_torn_tail(logger, segment, offset, "incomplete record");
                }
                ReadOutcome::ChecksumMismatch { len } if is_last && offset + len == buf.len() => {
                    return truncate_torn_tail(logger, segment, offset, "checksum mismatch in final record");
                }
                // Every append is synced before the next one starts, so a record that was never
                // fully written belongs to the last append, and so does everything after it.
                ReadOutcome::ChecksumMismatch { len }
                    if is_last && has_unwritten_sector(&buf, offset, offset + len) =>
                {
                    let reason = format!(
                        "unwritten sector in record, discarding {} byte(s) after it",
                        buf.len() - offset - len
                    );
                    return truncate_torn_tail(logger, segment, offset, &reason);
                }
                ReadOutcome::Incomplete => return Err(corrupted("incomplete record in closed segment".to_string())),
                ReadOutcome::ChecksumMismatch { .. } => return Err(corrupted("checksum mismatch".to_string())),
                ReadOutcome::Invalid(reason) => return Err(corrupted(reason)),
            }
        }

        Ok(())
    }

    fn apply(&mut self, record: Record) -> Result<(), String> {
        match record {
            Record::HardState(hard_state) => self.hard_state = hard_state,
            Record::LogReset { index, term } => {
                self.entries.clear();
                self.reset = Some((index, term));
            }
            Record::Entry(entry) => {
                let expected = self
                    .entries
                    .last()
                    .map(|e| e.index.plus(1))
                    .or_else(|| self.reset.map(|(index, _)| index.plus(1)));
                match expected {
                    Some(expected) if entry.index > expected => {
                        return Err(format!(
                            "entry {:?} leaves a gap (expected at most {:?})",
                            entry.index, expected
                        ));
                    }
                    Some(expected) if entry.index < expected => {
                        // Overwrite: drop this index and everything after it.
                        let keep = self.entries.iter().take_while(|e| e.index < entry.index).count();
                        self.entries.truncate(keep);
                    }
                    _ => {}
                }
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    fn finish(self) -> WalContents {
        WalContents {
            hard_state: self.hard_state,
            entries: self.entries,
            reset: self.reset,
        }
    }
}

/// True if the part of `buf[start..end]` in some sector is all zeros, i.e. that sector of the
/// record never reached the disk.
fn has_unwritten_sector(buf: &[u8], start: usize, end: usize) -> bool {
    let end = cmp::min(end, buf.len());
    let mut chunk_start = start;
    while chunk_start < end {
        let chunk_end = cmp::min(end, (chunk_start / SECTOR_SIZE + 1) * SECTOR_SIZE);
        if buf[chunk_start..chunk_end].iter().all(|b| *b == 0) {
            return true;
        }
        chunk_start = chunk_end;
    }
    false
}

fn truncate_torn_tail(
    logger: &slog::Logger,
    segment: &SegmentInfo,
    offset: usize,
    reason: &str,
) -> Result<(), WalError> {
    slog::warn!(
        logger,
        "Truncating torn tail of WAL segment {:?} at offset {}: {}",
        segment.path,
        offset,
        reason
    );
    let file = OpenOptions::new().write(true).open(&segment.path)?;
    file.set_len(offset as u64)?;
    file.sync_all()?;
    Ok(())
}
