use crate::commitlog::Index;
use crate::grpc::{ProtoHardState, ProtoLogEntry, ProtoLogReset};
use crate::replica::{encode_to_vec, entry_from_proto, entry_to_proto, hard_state_from_proto, hard_state_to_proto};
use crate::replica::{DecodeError, HardState, LogEntry, Term};
use prost::Message as _;

// Bytes:
// 0    : crc
// 1    : crc
// 2    : crc
// 3    : crc
// 4    : kind
// 5    : data size
// 6    : data size
// 7    : data size
// 8    : data size
// V0   : data
// ...
// Vn   : data
//
// The crc covers everything after itself (kind, size and data). Integers are big endian.
pub(crate) const HEADER_LEN: usize = 9;

const KIND_ENTRY: u8 = 1;
const KIND_HARD_STATE: u8 = 2;
const KIND_LOG_RESET: u8 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Record {
    Entry(LogEntry),
    HardState(HardState),
    /// The log was replaced by a snapshot at (index, term). Nothing before it is valid anymore.
    LogReset { index: Index, term: Term },
}

pub(crate) fn encode_record(record: &Record, out: &mut Vec<u8>) {
    let (kind, payload) = match record {
        Record::Entry(entry) => (KIND_ENTRY, encode_to_vec(&entry_to_proto(entry))),
        Record::HardState(hard_state) => (KIND_HARD_STATE, encode_to_vec(&hard_state_to_proto(hard_state))),
        Record::LogReset { index, term } => (
            KIND_LOG_RESET,
            encode_to_vec(&ProtoLogReset {
                index: index.as_u64(),
                term: term.as_u64(),
            }),
        ),
    };

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(&(payload.len() as u32).to_be_bytes());
    hasher.update(&payload);

    out.reserve(HEADER_LEN + payload.len());
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
    out.push(kind);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
}

#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// A valid record and the number of bytes it occupies.
    Record(Record, usize),
    /// The buffer ends in the middle of a record.
    Incomplete,
    /// A complete record whose checksum doesn't match. `len` is its claimed size.
    ChecksumMismatch { len: usize },
    /// Checksum matched but the contents are garbage.
    Invalid(String),
}

/// Reads the record at the start of `buf`. `buf` must be non-empty.
pub(crate) fn read_record(buf: &[u8]) -> ReadOutcome {
    if buf.len() < HEADER_LEN {
        return ReadOutcome::Incomplete;
    }

    let stored_crc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = buf[4];
    let data_len = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
    let total_len = HEADER_LEN + data_len;
    if buf.len() < total_len {
        return ReadOutcome::Incomplete;
    }

    let computed_crc = crc32fast::hash(&buf[4..total_len]);
    if computed_crc != stored_crc {
        return ReadOutcome::ChecksumMismatch { len: total_len };
    }

    match decode_payload(kind, &buf[HEADER_LEN..total_len]) {
        Ok(record) => ReadOutcome::Record(record, total_len),
        Err(e) => ReadOutcome::Invalid(e),
    }
}

fn decode_payload(kind: u8, payload: &[u8]) -> Result<Record, String> {
    let describe = |e: DecodeError| e.to_string();
    match kind {
        KIND_ENTRY => {
            let proto = ProtoLogEntry::decode(payload).map_err(|e| describe(e.into()))?;
            entry_from_proto(proto).map(Record::Entry).map_err(describe)
        }
        KIND_HARD_STATE => {
            let proto = ProtoHardState::decode(payload).map_err(|e| describe(e.into()))?;
            Ok(Record::HardState(hard_state_from_proto(proto)))
        }
        KIND_LOG_RESET => {
            let proto = ProtoLogReset::decode(payload).map_err(|e| describe(e.into()))?;
            Ok(Record::LogReset {
                index: Index::new(proto.index),
                term: Term::new(proto.term),
            })
        }
        unknown => Err(format!("unknown record kind {}", unknown)),
    }
}
