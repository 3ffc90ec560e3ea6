use crate::commitlog::Index;
use crate::replica::message::ReadContext;
use crate::replica::peers::ReplicaId;
use std::collections::{HashMap, HashSet, VecDeque};

/// Leader-side bookkeeping for ReadIndex requests. Each request records the commit index at the
/// time it arrived, and is released once a quorum acknowledges a heartbeat that carried it (or
/// any later request).
#[derive(Default)]
pub(crate) struct ReadOnly {
    pending: HashMap<ReadContext, ReadIndexStatus>,
    queue: VecDeque<ReadContext>,
}

struct ReadIndexStatus {
    index: Index,
    acks: HashSet<ReplicaId>,
}

impl ReadOnly {
    pub(crate) fn add_request(&mut self, index: Index, read_context: ReadContext, my_id: &ReplicaId) {
        if self.pending.contains_key(&read_context) {
            return;
        }

        let mut acks = HashSet::new();
        acks.insert(my_id.clone());
        self.pending.insert(read_context.clone(), ReadIndexStatus { index, acks });
        self.queue.push_back(read_context);
    }

    /// Records that `from` acknowledged the heartbeat carrying `read_context`. Returns everyone
    /// who acknowledged it so far, or None if the request isn't pending.
    pub(crate) fn recv_ack(&mut self, from: &ReplicaId, read_context: &ReadContext) -> Option<&HashSet<ReplicaId>> {
        let status = self.pending.get_mut(read_context)?;
        status.acks.insert(from.clone());
        Some(&status.acks)
    }

    /// Releases `read_context` and every request queued before it. An ack for a later heartbeat
    /// also proves leadership for all earlier requests.
    pub(crate) fn advance(&mut self, read_context: &ReadContext) -> Vec<(ReadContext, Index)> {
        let position = match self.queue.iter().position(|ctx| ctx == read_context) {
            Some(position) => position,
            None => return Vec::new(),
        };

        let mut released = Vec::with_capacity(position + 1);
        for ctx in self.queue.drain(..=position) {
            if let Some(status) = self.pending.remove(&ctx) {
                released.push((ctx, status.index));
            }
        }
        released
    }

    /// Context of the newest pending request; heartbeats carry it.
    pub(crate) fn last_pending_request(&self) -> Option<&ReadContext> {
        self.queue.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: u64) -> ReadContext {
        ReadContext {
            origin: ReplicaId::new("a"),
            id,
        }
    }

    #[test]
    fn later_ack_releases_earlier_requests() {
        let me = ReplicaId::new("a");
        let mut read_only = ReadOnly::default();
        read_only.add_request(Index::new(5), ctx(1), &me);
        read_only.add_request(Index::new(7), ctx(2), &me);
        read_only.add_request(Index::new(7), ctx(3), &me);
        assert_eq!(read_only.last_pending_request(), Some(&ctx(3)));

        let acks = read_only.recv_ack(&ReplicaId::new("b"), &ctx(2)).unwrap();
        assert_eq!(acks.len(), 2);

        let released = read_only.advance(&ctx(2));
        assert_eq!(released, vec![(ctx(1), Index::new(5)), (ctx(2), Index::new(7))]);
        assert_eq!(read_only.last_pending_request(), Some(&ctx(3)));

        // Already released.
        assert!(read_only.recv_ack(&ReplicaId::new("b"), &ctx(1)).is_none());
        assert!(read_only.advance(&ctx(1)).is_empty());
    }

    #[test]
    fn duplicate_request_is_ignored() {
        let me = ReplicaId::new("a");
        let mut read_only = ReadOnly::default();
        read_only.add_request(Index::new(5), ctx(1), &me);
        read_only.add_request(Index::new(9), ctx(1), &me);

        assert_eq!(read_only.advance(&ctx(1)), vec![(ctx(1), Index::new(5))]);
    }
}
