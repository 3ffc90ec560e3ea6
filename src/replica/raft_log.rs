//! In-memory log tail owned by the replica. Everything after the latest compaction point lives
//! here; the WAL holds the durable copy and `stable_to` tracks how far that copy reaches.

use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::log_entry::{LogEntry, Snapshot};
use std::cmp;

pub(crate) struct RaftLog {
    logger: slog::Logger,
    entries: Vec<LogEntry>,

    // Index and term of the entry right before `entries[0]`: the compaction (or snapshot) point.
    prev_index: Index,
    prev_term: Term,

    // Highest index known to be durable in the WAL.
    stable_to: Index,
    // Snapshot received from a leader that hasn't been persisted yet.
    pending_snapshot: Option<Snapshot>,

    // > index of highest log entry known to be committed
    committed: Index,
    // Highest index handed to the apply pipeline.
    applying: Index,
    // Highest index the apply pipeline reports as applied. Advisory.
    applied: Index,
}

impl RaftLog {
    /// `entries` must be contiguous and start right after `(prev_index, prev_term)`. They are
    /// considered durable, since they come from WAL replay.
    pub(crate) fn new(
        logger: slog::Logger,
        prev_index: Index,
        prev_term: Term,
        entries: Vec<LogEntry>,
        committed: Index,
        applied: Index,
    ) -> Self {
        let stable_to = prev_index.plus(entries.len() as u64);
        let mut log = RaftLog {
            logger,
            entries,
            prev_index,
            prev_term,
            stable_to,
            pending_snapshot: None,
            committed: cmp::max(committed, prev_index),
            applying: cmp::max(applied, prev_index),
            applied: cmp::max(applied, prev_index),
        };

        if log.committed > log.last_index() {
            slog::warn!(
                log.logger,
                "Commit index {:?} is past the last log entry {:?}. Clamping.",
                log.committed,
                log.last_index()
            );
            log.committed = log.last_index();
        }
        if log.applying > log.committed {
            log.committed = log.applying;
        }

        log
    }

    pub(crate) fn first_index(&self) -> Index {
        self.prev_index.plus(1)
    }

    pub(crate) fn last_index(&self) -> Index {
        self.prev_index.plus(self.entries.len() as u64)
    }

    pub(crate) fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(self.prev_term)
    }

    pub(crate) fn committed(&self) -> Index {
        self.committed
    }

    pub(crate) fn applied(&self) -> Index {
        self.applied
    }

    pub(crate) fn stable_to_index(&self) -> Index {
        self.stable_to
    }

    /// Term of the entry at `index`, or None if it's compacted away or beyond the end of the log.
    pub(crate) fn term(&self, index: Index) -> Option<Term> {
        if index == self.prev_index {
            return Some(self.prev_term);
        }
        self.entry(index).map(|e| e.term)
    }

    pub(crate) fn entry(&self, index: Index) -> Option<&LogEntry> {
        if index <= self.prev_index || index > self.last_index() {
            return None;
        }
        self.entries.get(self.offset_of(index))
    }

    pub(crate) fn match_term(&self, index: Index, term: Term) -> bool {
        self.term(index) == Some(term)
    }

    /// > If the logs have last entries with different terms, then the log with the later term is
    /// > more up-to-date. If the logs end with the same term, then whichever log is longer is more
    /// > up-to-date. (§5.4.1)
    pub(crate) fn is_up_to_date(&self, last_index: Index, last_term: Term) -> bool {
        last_term > self.last_term() || (last_term == self.last_term() && last_index >= self.last_index())
    }

    /// Index of the first entry in `entries` that is not already in the log with the same term.
    fn find_conflict(&self, entries: &[LogEntry]) -> Option<Index> {
        for entry in entries {
            if !self.match_term(entry.index, entry.term) {
                if entry.index <= self.last_index() {
                    slog::info!(
                        self.logger,
                        "Found conflict at index {:?} [existing term: {:?}, conflicting term: {:?}]",
                        entry.index,
                        self.term(entry.index),
                        entry.term
                    );
                }
                return Some(entry.index);
            }
        }
        None
    }

    /// Walks back from `index` to the last entry whose term is <= `term`. A leader uses this with
    /// a follower's rejection hint to skip a whole term of mismatching entries in one round trip.
    pub(crate) fn find_conflict_by_term(&self, index: Index, term: Term) -> (Index, Term) {
        let mut i = cmp::min(index, self.last_index());
        loop {
            match self.term(i) {
                Some(t) if t > term && !i.is_zero() => i = i.minus(1),
                Some(t) => return (i, t),
                None => return (i, Term::default()),
            }
        }
    }

    /// Follower side of AppendEntries. Returns the last index of the new entries if the
    /// consistency check on `(prev_index, prev_term)` passes.
    pub(crate) fn maybe_append(
        &mut self,
        prev_index: Index,
        prev_term: Term,
        leader_commit: Index,
        entries: Vec<LogEntry>,
    ) -> Option<Index> {
        if !self.match_term(prev_index, prev_term) {
            return None;
        }

        let last_new_index = prev_index.plus(entries.len() as u64);
        if let Some(conflict_index) = self.find_conflict(&entries) {
            assert!(
                conflict_index > self.committed,
                "Entry {:?} conflicts with committed entry (committed={:?})",
                conflict_index,
                self.committed
            );
            let skip = conflict_index.distance_from(prev_index.plus(1)) as usize;
            self.append(entries.into_iter().skip(skip).collect());
        }

        self.commit_to(cmp::min(leader_commit, last_new_index));
        Some(last_new_index)
    }

    /// Appends entries, truncating any existing entries at or after the first new index. Returns
    /// the new last index.
    pub(crate) fn append(&mut self, entries: Vec<LogEntry>) -> Index {
        let first_new = match entries.first() {
            Some(entry) => entry.index,
            None => return self.last_index(),
        };

        assert!(
            first_new > self.committed,
            "Can't overwrite committed entries: first new index {:?}, committed {:?}",
            first_new,
            self.committed
        );

        if first_new <= self.last_index() {
            slog::info!(self.logger, "Truncating log from index {:?}", first_new);
            let keep = self.offset_of(first_new);
            self.entries.truncate(keep);
            self.stable_to = cmp::min(self.stable_to, first_new.minus(1));
        }

        assert_eq!(
            first_new,
            self.last_index().plus(1),
            "Appending entries would leave a gap in the log"
        );

        self.entries.extend(entries);
        self.last_index()
    }

    /// Entries in `[low, high]`, at most `max_entries` of them.
    pub(crate) fn slice(&self, low: Index, high: Index, max_entries: usize) -> Vec<LogEntry> {
        if low > high || low < self.first_index() || high > self.last_index() {
            return Vec::new();
        }

        let start = self.offset_of(low);
        let end = cmp::min(self.offset_of(high) + 1, start + max_entries);
        self.entries[start..end].to_vec()
    }

    pub(crate) fn unstable_entries(&self) -> &[LogEntry] {
        let start = self.stable_to.distance_from(self.prev_index) as usize;
        if start >= self.entries.len() {
            return &[];
        }
        &self.entries[start..]
    }

    pub(crate) fn has_unstable(&self) -> bool {
        !self.unstable_entries().is_empty()
    }

    /// Marks entries up to `index` as durable, if the entry there still has `term`. A mismatch
    /// means the entry was overwritten while it was being persisted, so it must be persisted again.
    pub(crate) fn stable_to(&mut self, index: Index, term: Term) {
        if index > self.stable_to && self.match_term(index, term) {
            self.stable_to = index;
        }
    }

    pub(crate) fn commit_to(&mut self, index: Index) {
        if index > self.committed {
            assert!(
                index <= self.last_index(),
                "Commit index {:?} is out of range (last index {:?})",
                index,
                self.last_index()
            );
            self.committed = index;
        }
    }

    /// Leader side commit rule: only commit by counting replicas if the entry is from `term`.
    pub(crate) fn maybe_commit(&mut self, index: Index, term: Term) -> bool {
        if index > self.committed && self.match_term(index, term) {
            self.commit_to(index);
            true
        } else {
            false
        }
    }

    pub(crate) fn has_next_committed(&self) -> bool {
        cmp::min(self.committed, self.last_index()) > self.applying
    }

    /// Committed entries not yet handed to the apply pipeline. Moves the `applying` cursor.
    pub(crate) fn next_committed_entries(&mut self, max_entries: usize) -> Vec<LogEntry> {
        let high = cmp::min(self.committed, self.last_index());
        if high <= self.applying {
            return Vec::new();
        }

        let entries = self.slice(self.applying.plus(1), high, max_entries);
        if let Some(last) = entries.last() {
            self.applying = last.index;
        }
        entries
    }

    pub(crate) fn applied_to(&mut self, index: Index) {
        if index > self.applied {
            self.applied = index;
        }
    }

    pub(crate) fn pending_snapshot(&self) -> Option<&Snapshot> {
        self.pending_snapshot.as_ref()
    }

    /// Replaces the whole log with `snapshot`. No entry at or before the snapshot index survives.
    pub(crate) fn restore(&mut self, snapshot: Snapshot) {
        slog::info!(
            self.logger,
            "Restoring log to snapshot [index: {:?}, term: {:?}]",
            snapshot.index(),
            snapshot.term()
        );

        self.entries.clear();
        self.prev_index = snapshot.index();
        self.prev_term = snapshot.term();
        self.stable_to = snapshot.index();
        self.committed = snapshot.index();
        self.applying = snapshot.index();
        self.applied = snapshot.index();
        self.pending_snapshot.replace(snapshot);
    }

    pub(crate) fn stable_snapshot_to(&mut self, index: Index) {
        if self.pending_snapshot.as_ref().map(|s| s.index()) == Some(index) {
            self.pending_snapshot = None;
        }
    }

    /// Drops entries up to and including `index`. Only applied, durable entries may go.
    pub(crate) fn compact_to(&mut self, index: Index) -> bool {
        if index <= self.prev_index {
            return false;
        }
        if index > self.applied || index > self.stable_to {
            slog::warn!(
                self.logger,
                "Refusing to compact to {:?}: applied={:?}, stable={:?}",
                index,
                self.applied,
                self.stable_to
            );
            return false;
        }

        let term = match self.term(index) {
            Some(term) => term,
            None => return false,
        };
        let drop_count = index.distance_from(self.prev_index) as usize;
        self.entries.drain(..drop_count);
        self.prev_index = index;
        self.prev_term = term;

        true
    }

    fn offset_of(&self, index: Index) -> usize {
        (index.as_u64() - self.prev_index.as_u64() - 1) as usize
    }
}
