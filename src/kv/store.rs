use crate::apply::{StateMachine, StateMachineError, StateMachineOutput};
use crate::commitlog::Index;
use crate::grpc::{proto_kv_command, ProtoKvCommand, ProtoKvDelete, ProtoKvPair, ProtoKvPut, ProtoKvSnapshot};
use crate::replica::{encode_to_vec, DecodeError};
use bytes::Bytes;
use prost::Message as _;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// A write to the key-value store, as carried by a log entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KvCommand {
    Put { key: String, value: Bytes },
    Delete { key: String },
}

impl KvCommand {
    pub fn encode(&self) -> Bytes {
        let command = match self {
            KvCommand::Put { key, value } => proto_kv_command::Command::Put(ProtoKvPut {
                key: key.clone(),
                value: value.to_vec(),
            }),
            KvCommand::Delete { key } => proto_kv_command::Command::Delete(ProtoKvDelete { key: key.clone() }),
        };

        Bytes::from(encode_to_vec(&ProtoKvCommand { command: Some(command) }))
    }

    pub fn decode(data: &[u8]) -> Result<KvCommand, DecodeError> {
        let proto = ProtoKvCommand::decode(data)?;
        match proto.command.ok_or(DecodeError::MissingField("KvCommand.command"))? {
            proto_kv_command::Command::Put(put) => Ok(KvCommand::Put {
                key: put.key,
                value: Bytes::from(put.value),
            }),
            proto_kv_command::Command::Delete(delete) => Ok(KvCommand::Delete { key: delete.key }),
        }
    }
}

#[derive(Default)]
struct KvState {
    pairs: BTreeMap<String, Bytes>,
    applied: Index,
}

/// KvStore is an in-memory key-value state machine. Applying a command returns the key's previous
/// value, if it had one.
///
/// It keeps nothing on disk, so after a restart it's rebuilt from the newest snapshot and the log.
pub struct KvStore {
    logger: slog::Logger,
    state: Arc<RwLock<KvState>>,
}

/// Read access to a `KvStore` from outside the apply task. Reads are only linearizable after a
/// successful `ReplicatedLog::read_index()`.
#[derive(Clone)]
pub struct KvReader {
    state: Arc<RwLock<KvState>>,
}

impl KvStore {
    pub fn new(logger: slog::Logger) -> (KvStore, KvReader) {
        let state = Arc::new(RwLock::new(KvState::default()));

        (
            KvStore {
                logger,
                state: state.clone(),
            },
            KvReader { state },
        )
    }
}

impl KvReader {
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.state.read().expect("KV lock poisoned").pairs.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("KV lock poisoned").pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of every pair, in key order.
    pub fn pairs(&self) -> BTreeMap<String, Bytes> {
        self.state.read().expect("KV lock poisoned").pairs.clone()
    }

    /// Index of the last command reflected in reads.
    pub fn applied_index(&self) -> u64 {
        self.state.read().expect("KV lock poisoned").applied.as_u64()
    }
}

impl StateMachine for KvStore {
    fn apply(&mut self, index: Index, data: Bytes) -> StateMachineOutput {
        let mut state = self.state.write().expect("KV lock poisoned");
        state.applied = index;

        let previous = match KvCommand::decode(&data) {
            Ok(KvCommand::Put { key, value }) => state.pairs.insert(key, value),
            Ok(KvCommand::Delete { key }) => state.pairs.remove(&key),
            Err(e) => {
                // Committed, so every replica skips it the same way.
                slog::warn!(self.logger, "Skipping undecodable command at {:?}: {}", index, e);
                None
            }
        };

        match previous {
            Some(value) => StateMachineOutput::Data(value),
            None => StateMachineOutput::NoData,
        }
    }

    fn snapshot(&self) -> Result<Bytes, StateMachineError> {
        let state = self.state.read().expect("KV lock poisoned");
        let proto = ProtoKvSnapshot {
            applied_index: state.applied.as_u64(),
            pairs: state
                .pairs
                .iter()
                .map(|(key, value)| ProtoKvPair {
                    key: key.clone(),
                    value: value.to_vec(),
                })
                .collect(),
        };

        Ok(Bytes::from(encode_to_vec(&proto)))
    }

    fn restore(&mut self, index: Index, snapshot: Bytes) -> Result<(), StateMachineError> {
        let proto =
            ProtoKvSnapshot::decode(snapshot).map_err(|e| StateMachineError::MalformedSnapshot(e.to_string()))?;
        if proto.applied_index != index.as_u64() {
            return Err(StateMachineError::MalformedSnapshot(format!(
                "snapshot data is at index {} but was installed at {:?}",
                proto.applied_index, index
            )));
        }

        let pairs = proto
            .pairs
            .into_iter()
            .map(|pair| (pair.key, Bytes::from(pair.value)))
            .collect();
        *self.state.write().expect("KV lock poisoned") = KvState { pairs, applied: index };

        Ok(())
    }

    fn last_applied(&self) -> Index {
        self.state.read().expect("KV lock poisoned").applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (KvStore, KvReader) {
        KvStore::new(slog::Logger::root(slog::Discard, slog::o!()))
    }

    fn put(key: &str, value: &'static str) -> Bytes {
        KvCommand::Put {
            key: key.to_string(),
            value: Bytes::from_static(value.as_bytes()),
        }
        .encode()
    }

    #[test]
    fn applies_puts_and_deletes() {
        let (mut store, reader) = store();

        assert_eq!(store.apply(Index::new(1), put("a", "1")), StateMachineOutput::NoData);
        assert_eq!(
            store.apply(Index::new(2), put("a", "2")),
            StateMachineOutput::Data(Bytes::from_static(b"1"))
        );
        assert_eq!(reader.get("a"), Some(Bytes::from_static(b"2")));

        let delete = KvCommand::Delete { key: "a".to_string() }.encode();
        assert_eq!(
            store.apply(Index::new(3), delete),
            StateMachineOutput::Data(Bytes::from_static(b"2"))
        );
        assert!(reader.is_empty());
        assert_eq!(store.last_applied(), Index::new(3));
    }

    #[test]
    fn skips_garbage_but_advances() {
        let (mut store, reader) = store();

        let output = store.apply(Index::new(1), Bytes::from_static(&[0xff, 0xff, 0xff]));
        assert_eq!(output, StateMachineOutput::NoData);
        assert!(reader.is_empty());
        assert_eq!(reader.applied_index(), 1);
    }

    #[test]
    fn restores_from_snapshot() {
        let (mut source, _) = store();
        source.apply(Index::new(1), put("a", "1"));
        source.apply(Index::new(2), put("b", "2"));
        let snapshot = source.snapshot().unwrap();

        let (mut target, reader) = store();
        target.apply(Index::new(1), put("stale", "x"));
        target.restore(Index::new(2), snapshot.clone()).unwrap();

        assert_eq!(reader.get("a"), Some(Bytes::from_static(b"1")));
        assert_eq!(reader.get("b"), Some(Bytes::from_static(b"2")));
        assert_eq!(reader.get("stale"), None);
        assert_eq!(target.last_applied(), Index::new(2));

        // Installed at the wrong index.
        assert!(matches!(
            target.restore(Index::new(5), snapshot),
            Err(StateMachineError::MalformedSnapshot(_))
        ));
    }
}
