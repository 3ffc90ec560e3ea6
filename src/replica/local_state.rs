use crate::commitlog::Index;
use crate::replica::peers::ReplicaId;
use std::fmt;

#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Term(u64);

impl Term {
    pub const fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HardState is the voting and commit metadata that must be durable before any message that
/// depends on it leaves this replica.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HardState {
    pub term: Term,
    pub voted_for: Option<ReplicaId>,
    pub commit: Index,
}

/// LocalState holds the raft paper's "persistent state on all servers" (minus the log). The
/// replica mutates it in memory, and every change is surfaced through the next `ReadyBatch` as a
/// `HardState` that the driver persists before sending anything that depends on it.
///
/// Store methods follow a CAS like contract: they return true if they mutated state.
pub(crate) struct LocalState {
    current_term: Term,
    voted_for_this_term: Option<ReplicaId>,
    my_replica_id: ReplicaId,
}

impl LocalState {
    pub(crate) fn new(my_replica_id: ReplicaId, current_term: Term, voted_for: Option<ReplicaId>) -> Self {
        LocalState {
            current_term,
            voted_for_this_term: voted_for,
            my_replica_id,
        }
    }

    /// Set current term to `new_term`, iff it is larger than current term. Clears the vote.
    pub(crate) fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        if new_term <= self.current_term {
            false
        } else {
            self.current_term = new_term;
            self.voted_for_this_term = None;
            true
        }
    }

    /// Store our vote for the current term iff we have not voted this term, or we already voted
    /// for the same candidate (a retransmitted request must get the same answer).
    pub(crate) fn store_vote_if_unvoted(&mut self, vote: &ReplicaId) -> bool {
        match &self.voted_for_this_term {
            None => {
                self.voted_for_this_term.replace(vote.clone());
                true
            }
            Some(existing) => existing == vote,
        }
    }

    /// Return the new term. Used when transitioning to candidate.
    pub(crate) fn increment_term_and_vote_for_self(&mut self) -> Term {
        self.current_term.incr();
        self.voted_for_this_term.replace(self.my_replica_id.clone());

        self.current_term
    }

    pub(crate) fn current_term(&self) -> Term {
        self.current_term
    }

    pub(crate) fn voted_for(&self) -> Option<&ReplicaId> {
        self.voted_for_this_term.as_ref()
    }

    pub(crate) fn hard_state(&self, commit: Index) -> HardState {
        HardState {
            term: self.current_term,
            voted_for: self.voted_for_this_term.clone(),
            commit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_bump_clears_vote() {
        let mut state = LocalState::new(ReplicaId::new("a"), Term::new(3), Some(ReplicaId::new("b")));

        assert!(!state.store_term_if_increased(Term::new(3)));
        assert_eq!(state.voted_for(), Some(&ReplicaId::new("b")));

        assert!(state.store_term_if_increased(Term::new(4)));
        assert_eq!(state.current_term(), Term::new(4));
        assert_eq!(state.voted_for(), None);
    }

    #[test]
    fn votes_once_per_term() {
        let mut state = LocalState::new(ReplicaId::new("a"), Term::new(1), None);

        assert!(state.store_vote_if_unvoted(&ReplicaId::new("b")));
        // Same candidate asking again gets the same answer.
        assert!(state.store_vote_if_unvoted(&ReplicaId::new("b")));
        assert!(!state.store_vote_if_unvoted(&ReplicaId::new("c")));
    }

    #[test]
    fn candidate_votes_for_self() {
        let mut state = LocalState::new(ReplicaId::new("a"), Term::new(7), Some(ReplicaId::new("b")));

        let term = state.increment_term_and_vote_for_self();

        assert_eq!(term, Term::new(8));
        assert_eq!(
            state.hard_state(Index::new(2)),
            HardState {
                term: Term::new(8),
                voted_for: Some(ReplicaId::new("a")),
                commit: Index::new(2),
            }
        );
    }
}
