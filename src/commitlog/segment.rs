use crate::commitlog::Index;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SEGMENT_EXTENSION: &str = "wal";

/// One WAL file. Segments are named `{seq:016x}-{first_index:016x}.wal`, where `first_index` is
/// the index the log was about to append when the segment was created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct SegmentInfo {
    pub(crate) seq: u64,
    pub(crate) first_index: Index,
    pub(crate) path: PathBuf,
}

impl SegmentInfo {
    pub(crate) fn new(directory: &Path, seq: u64, first_index: Index) -> Self {
        let file_name = format!("{:016x}-{:016x}.{}", seq, first_index.as_u64(), SEGMENT_EXTENSION);
        SegmentInfo {
            seq,
            first_index,
            path: directory.join(file_name),
        }
    }

    fn parse(path: PathBuf) -> Option<Self> {
        if path.extension()?.to_str()? != SEGMENT_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let mut parts = stem.splitn(2, '-');
        let seq = u64::from_str_radix(parts.next()?, 16).ok()?;
        let first_index = u64::from_str_radix(parts.next()?, 16).ok()?;

        Some(SegmentInfo {
            seq,
            first_index: Index::new(first_index),
            path,
        })
    }
}

/// All segments in `directory`, oldest first. Files that don't look like segments are ignored.
pub(crate) fn list_segments(directory: &Path) -> Result<Vec<SegmentInfo>, io::Error> {
    let mut segments = Vec::new();
    for dir_entry in fs::read_dir(directory)? {
        let path = dir_entry?.path();
        if let Some(segment) = SegmentInfo::parse(path) {
            segments.push(segment);
        }
    }
    segments.sort_by_key(|s| s.seq);
    Ok(segments)
}

/// Makes file creations, renames and deletions in `directory` durable.
pub(crate) fn sync_directory(directory: &Path) -> Result<(), io::Error> {
    fs::File::open(directory)?.sync_all()
}
