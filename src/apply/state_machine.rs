use crate::commitlog::Index;
use bytes::Bytes;

/// StateMachine is the application specific view of applying the replicated log in sequential
/// consistent order. It is owned by a single apply task and never called concurrently.
pub trait StateMachine: Send + 'static {
    /// apply is called only when it's guaranteed that the entry at `index` has been committed
    /// (i.e. replicated to a majority). You will never need to reverse an entry once you've been
    /// asked to apply it, so your impl need not be reversible.
    ///
    /// Entries arrive by strictly increasing index, and an index at or below `last_applied()` is
    /// never passed in. The output is handed back to the client that proposed the entry, if it's
    /// still waiting on this replica.
    fn apply(&mut self, index: Index, data: Bytes) -> StateMachineOutput;

    /// Serializes the state as of `last_applied()`.
    fn snapshot(&self) -> Result<Bytes, StateMachineError>;

    /// Replaces the whole state with a snapshot taken at `index`.
    fn restore(&mut self, index: Index, snapshot: Bytes) -> Result<(), StateMachineError>;

    /// Highest index reflected in the state. A durable state machine persists this with its data
    /// so that entries aren't applied twice across restarts.
    fn last_applied(&self) -> Index;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StateMachineOutput {
    Data(Bytes),
    NoData,
}

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("Snapshot is malformed: {0}")]
    MalformedSnapshot(String),
    #[error("State machine failure: {0}")]
    Other(String),
}
