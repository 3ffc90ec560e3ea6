use crate::commitlog::Index;
use crate::replica::peers::ReplicaId;
use std::collections::{BTreeSet, HashMap};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum VoteResult {
    Won,
    Lost,
    Pending,
}

/// A set of voters that decides by strict majority.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct MajorityConfig {
    voters: BTreeSet<ReplicaId>,
}

impl MajorityConfig {
    pub(crate) fn new(voters: BTreeSet<ReplicaId>) -> Self {
        MajorityConfig { voters }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    pub(crate) fn contains(&self, id: &ReplicaId) -> bool {
        self.voters.contains(id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ReplicaId> {
        self.voters.iter()
    }

    /// Highest index that a majority of voters have matched. `None` for an empty config, which
    /// places no constraint.
    pub(crate) fn committed_index<F>(&self, matched: F) -> Option<Index>
    where
        F: Fn(&ReplicaId) -> Index,
    {
        if self.voters.is_empty() {
            return None;
        }

        let matched_indexes = self.voters.iter().map(matched).collect();
        Some(majority_matched_index(matched_indexes))
    }

    pub(crate) fn vote_result(&self, votes: &HashMap<ReplicaId, bool>) -> VoteResult {
        if self.voters.is_empty() {
            // An empty config wins every vote, so that a joint config with an empty half
            // behaves like its other half.
            return VoteResult::Won;
        }

        let mut granted = 0;
        let mut missing = 0;
        for voter in self.voters.iter() {
            match votes.get(voter) {
                Some(true) => granted += 1,
                Some(false) => {}
                None => missing += 1,
            }
        }

        let quorum = majority_size(self.voters.len());
        if granted >= quorum {
            VoteResult::Won
        } else if granted + missing >= quorum {
            VoteResult::Pending
        } else {
            VoteResult::Lost
        }
    }
}

/// Two majority configs that must both agree. Outside of a reconfiguration `outgoing` is empty.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct JointConfig {
    incoming: MajorityConfig,
    outgoing: MajorityConfig,
}

impl JointConfig {
    pub(crate) fn new(incoming: BTreeSet<ReplicaId>, outgoing: BTreeSet<ReplicaId>) -> Self {
        JointConfig {
            incoming: MajorityConfig::new(incoming),
            outgoing: MajorityConfig::new(outgoing),
        }
    }

    pub(crate) fn contains(&self, id: &ReplicaId) -> bool {
        self.incoming.contains(id) || self.outgoing.contains(id)
    }

    /// Union of both halves.
    pub(crate) fn ids(&self) -> BTreeSet<ReplicaId> {
        self.incoming.iter().chain(self.outgoing.iter()).cloned().collect()
    }

    pub(crate) fn is_single_voter(&self, id: &ReplicaId) -> bool {
        let ids = self.ids();
        ids.len() == 1 && ids.contains(id)
    }

    pub(crate) fn committed_index<F>(&self, matched: F) -> Index
    where
        F: Fn(&ReplicaId) -> Index,
    {
        match (
            self.incoming.committed_index(&matched),
            self.outgoing.committed_index(&matched),
        ) {
            (Some(i), Some(o)) => i.min(o),
            (Some(i), None) => i,
            (None, Some(o)) => o,
            (None, None) => Index::zero(),
        }
    }

    pub(crate) fn vote_result(&self, votes: &HashMap<ReplicaId, bool>) -> VoteResult {
        let incoming = self.incoming.vote_result(votes);
        let outgoing = self.outgoing.vote_result(votes);

        if incoming == outgoing {
            return incoming;
        }
        if incoming == VoteResult::Lost || outgoing == VoteResult::Lost {
            return VoteResult::Lost;
        }

        // One side won, the other is still pending.
        VoteResult::Pending
    }
}

fn majority_size(num_voters: usize) -> usize {
    num_voters / 2 + 1
}

/// Given every voter's matched index, return the largest index that a strict majority of voters
/// have matched.
fn majority_matched_index(mut matched_indexes: Vec<Index>) -> Index {
    // Sort descending; the value at position `quorum - 1` is matched by at least `quorum` voters.
    matched_indexes.sort_unstable_by(|a, b| b.cmp(a));
    let quorum = majority_size(matched_indexes.len());

    matched_indexes[quorum - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> BTreeSet<ReplicaId> {
        raw.iter().map(|id| ReplicaId::new(*id)).collect()
    }

    #[test]
    fn test_commit_checker_logic() {
        fn run(expected: u64, matches: Vec<u64>) {
            let matches = matches.into_iter().map(Index::new).collect();
            assert_eq!(Index::new(expected), majority_matched_index(matches));
        }

        // 1-cluster
        run(0, vec![0]);
        run(9, vec![9]);

        // 3-cluster
        run(0, vec![9, 0, 0]);
        run(9, vec![9, 0, 9]);
        run(8, vec![9, 8, 9]);
        run(8, vec![9, 8, 7]);

        // 4-cluster
        run(0, vec![9, 0, 0, 0]);
        run(0, vec![9, 0, 0, 9]);
        run(8, vec![9, 0, 8, 9]);
        run(8, vec![9, 7, 8, 9]);

        // 5-cluster
        run(0, vec![9, 0, 0, 0, 0]);
        run(0, vec![9, 0, 0, 0, 9]);
        run(8, vec![9, 0, 0, 8, 9]);
        run(8, vec![9, 0, 7, 8, 9]);
        run(7, vec![9, 6, 7, 8, 9]);

        // Ordering doesn't matter
        run(8, vec![7, 9, 8]);
        run(7, vec![9, 8, 0, 0, 7]);
    }

    #[test]
    fn joint_commit_is_min_of_both_halves() {
        let config = JointConfig::new(ids(&["a", "b", "c"]), ids(&["c", "d", "e"]));
        let matched: HashMap<ReplicaId, Index> = vec![("a", 10), ("b", 10), ("c", 4), ("d", 3), ("e", 7)]
            .into_iter()
            .map(|(id, i)| (ReplicaId::new(id), Index::new(i)))
            .collect();

        let committed = config.committed_index(|id| matched.get(id).copied().unwrap_or_default());

        // incoming majority: 10; outgoing majority: 4.
        assert_eq!(committed, Index::new(4));
    }

    #[test]
    fn non_joint_ignores_empty_outgoing() {
        let config = JointConfig::new(ids(&["a", "b", "c"]), BTreeSet::new());

        let committed = config.committed_index(|id| if id.as_str() == "c" { Index::new(1) } else { Index::new(5) });

        assert_eq!(committed, Index::new(5));
    }

    #[test]
    fn majority_vote_results() {
        let config = MajorityConfig::new(ids(&["a", "b", "c"]));
        let mut votes = HashMap::new();

        votes.insert(ReplicaId::new("a"), true);
        assert_eq!(config.vote_result(&votes), VoteResult::Pending);

        votes.insert(ReplicaId::new("b"), false);
        assert_eq!(config.vote_result(&votes), VoteResult::Pending);

        votes.insert(ReplicaId::new("c"), true);
        assert_eq!(config.vote_result(&votes), VoteResult::Won);

        votes.insert(ReplicaId::new("c"), false);
        assert_eq!(config.vote_result(&votes), VoteResult::Lost);
    }

    #[test]
    fn joint_vote_needs_both_majorities() {
        let config = JointConfig::new(ids(&["a", "b", "c"]), ids(&["a", "d", "e"]));
        let mut votes = HashMap::new();
        votes.insert(ReplicaId::new("a"), true);
        votes.insert(ReplicaId::new("b"), true);

        // Incoming won, outgoing still pending.
        assert_eq!(config.vote_result(&votes), VoteResult::Pending);

        votes.insert(ReplicaId::new("d"), false);
        votes.insert(ReplicaId::new("e"), false);
        assert_eq!(config.vote_result(&votes), VoteResult::Lost);

        votes.insert(ReplicaId::new("e"), true);
        assert_eq!(config.vote_result(&votes), VoteResult::Won);
    }
}
