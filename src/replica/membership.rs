use crate::replica::election::JointConfig;
use crate::replica::peers::ReplicaId;
use std::collections::BTreeSet;

/// ConfigState is the cluster membership as of some log index.
///
/// While a reconfiguration is in progress the config is "joint": decisions need a majority of
/// `voters` AND a majority of `voters_outgoing`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigState {
    pub voters: BTreeSet<ReplicaId>,
    pub learners: BTreeSet<ReplicaId>,
    pub voters_outgoing: BTreeSet<ReplicaId>,
}

impl ConfigState {
    pub fn with_voters<I: IntoIterator<Item = ReplicaId>>(voters: I) -> Self {
        ConfigState {
            voters: voters.into_iter().collect(),
            ..ConfigState::default()
        }
    }

    pub fn is_joint(&self) -> bool {
        !self.voters_outgoing.is_empty()
    }

    /// True if `id` votes in either half of the config.
    pub fn is_voter(&self, id: &ReplicaId) -> bool {
        self.voters.contains(id) || self.voters_outgoing.contains(id)
    }

    pub fn is_learner(&self, id: &ReplicaId) -> bool {
        self.learners.contains(id)
    }

    pub fn is_member(&self, id: &ReplicaId) -> bool {
        self.is_voter(id) || self.is_learner(id)
    }

    /// Every replica that should receive the log: voters of both halves and learners.
    pub fn members(&self) -> BTreeSet<ReplicaId> {
        self.voters
            .iter()
            .chain(self.voters_outgoing.iter())
            .chain(self.learners.iter())
            .cloned()
            .collect()
    }

    pub(crate) fn joint_config(&self) -> JointConfig {
        JointConfig::new(self.voters.clone(), self.voters_outgoing.clone())
    }

    /// Returns the config that results from applying `change` to this config.
    ///
    /// Changing at most one voter moves directly to the new config, since any majority of the
    /// old set overlaps any majority of the new set. Changing more voters enters a joint config;
    /// an empty change leaves it.
    pub fn apply(&self, change: &ConfChange) -> Result<ConfigState, ConfChangeError> {
        if change.is_leave_joint() {
            if !self.is_joint() {
                return Err(ConfChangeError::NotJoint);
            }
            return Ok(ConfigState {
                voters: self.voters.clone(),
                learners: self.learners.clone(),
                voters_outgoing: BTreeSet::new(),
            });
        }

        if self.is_joint() {
            return Err(ConfChangeError::AlreadyJoint);
        }

        let mut voters = self.voters.clone();
        let mut learners = self.learners.clone();
        for single in change.changes.iter() {
            match single.kind {
                ConfChangeKind::AddVoter => {
                    learners.remove(&single.replica_id);
                    voters.insert(single.replica_id.clone());
                }
                ConfChangeKind::AddLearner => {
                    if voters.contains(&single.replica_id) {
                        return Err(ConfChangeError::VoterToLearner(single.replica_id.clone()));
                    }
                    learners.insert(single.replica_id.clone());
                }
                ConfChangeKind::RemoveNode => {
                    voters.remove(&single.replica_id);
                    learners.remove(&single.replica_id);
                }
            }
        }

        if voters.is_empty() {
            return Err(ConfChangeError::NoVoters);
        }

        let voters_changed = voters.symmetric_difference(&self.voters).count();
        if voters_changed <= 1 {
            Ok(ConfigState {
                voters,
                learners,
                voters_outgoing: BTreeSet::new(),
            })
        } else {
            Ok(ConfigState {
                voters,
                learners,
                voters_outgoing: self.voters.clone(),
            })
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfChangeKind {
    AddVoter,
    AddLearner,
    RemoveNode,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfChangeSingle {
    pub kind: ConfChangeKind,
    pub replica_id: ReplicaId,
    /// Peer address ("host:port") for transports that need one to reach a new member.
    pub address: Option<String>,
}

/// A membership change carried by a `ConfChange` log entry. It takes effect when the entry is
/// applied, never when it's proposed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfChange {
    pub changes: Vec<ConfChangeSingle>,
}

impl ConfChange {
    pub fn add_voter(replica_id: ReplicaId, address: Option<String>) -> Self {
        Self::single(ConfChangeKind::AddVoter, replica_id, address)
    }

    pub fn add_learner(replica_id: ReplicaId, address: Option<String>) -> Self {
        Self::single(ConfChangeKind::AddLearner, replica_id, address)
    }

    pub fn remove_node(replica_id: ReplicaId) -> Self {
        Self::single(ConfChangeKind::RemoveNode, replica_id, None)
    }

    pub fn leave_joint() -> Self {
        ConfChange::default()
    }

    pub fn is_leave_joint(&self) -> bool {
        self.changes.is_empty()
    }

    fn single(kind: ConfChangeKind, replica_id: ReplicaId, address: Option<String>) -> Self {
        ConfChange {
            changes: vec![ConfChangeSingle {
                kind,
                replica_id,
                address,
            }],
        }
    }
}

#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum ConfChangeError {
    #[error("Can't leave a joint config when config is not joint")]
    NotJoint,
    #[error("A joint config must be left before it can be changed again")]
    AlreadyJoint,
    #[error("Change would leave the cluster without voters")]
    NoVoters,
    #[error("Can't demote voter {0} directly to learner; remove it first")]
    VoterToLearner(ReplicaId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> BTreeSet<ReplicaId> {
        raw.iter().map(|id| ReplicaId::new(*id)).collect()
    }

    fn three_voters() -> ConfigState {
        ConfigState::with_voters(ids(&["a", "b", "c"]))
    }

    #[test]
    fn single_voter_change_is_simple() {
        let config = three_voters()
            .apply(&ConfChange::add_voter(ReplicaId::new("d"), None))
            .unwrap();

        assert_eq!(config.voters, ids(&["a", "b", "c", "d"]));
        assert!(!config.is_joint());

        let config = config.apply(&ConfChange::remove_node(ReplicaId::new("a"))).unwrap();
        assert_eq!(config.voters, ids(&["b", "c", "d"]));
        assert!(!config.is_joint());
    }

    #[test]
    fn multi_voter_change_enters_and_leaves_joint() {
        let change = ConfChange {
            changes: vec![
                ConfChangeSingle {
                    kind: ConfChangeKind::AddVoter,
                    replica_id: ReplicaId::new("d"),
                    address: None,
                },
                ConfChangeSingle {
                    kind: ConfChangeKind::RemoveNode,
                    replica_id: ReplicaId::new("a"),
                    address: None,
                },
            ],
        };

        let joint = three_voters().apply(&change).unwrap();
        assert!(joint.is_joint());
        assert_eq!(joint.voters, ids(&["b", "c", "d"]));
        assert_eq!(joint.voters_outgoing, ids(&["a", "b", "c"]));
        assert!(joint.is_voter(&ReplicaId::new("a")));

        assert_eq!(
            joint.apply(&ConfChange::add_voter(ReplicaId::new("e"), None)),
            Err(ConfChangeError::AlreadyJoint)
        );

        let left = joint.apply(&ConfChange::leave_joint()).unwrap();
        assert!(!left.is_joint());
        assert!(!left.is_voter(&ReplicaId::new("a")));
    }

    #[test]
    fn learners() {
        let config = three_voters()
            .apply(&ConfChange::add_learner(ReplicaId::new("l"), None))
            .unwrap();
        assert!(config.is_learner(&ReplicaId::new("l")));
        assert!(!config.is_voter(&ReplicaId::new("l")));
        assert!(config.members().contains(&ReplicaId::new("l")));

        // Promotion.
        let config = config.apply(&ConfChange::add_voter(ReplicaId::new("l"), None)).unwrap();
        assert!(config.is_voter(&ReplicaId::new("l")));
        assert!(!config.is_learner(&ReplicaId::new("l")));

        assert_eq!(
            config.apply(&ConfChange::add_learner(ReplicaId::new("a"), None)),
            Err(ConfChangeError::VoterToLearner(ReplicaId::new("a")))
        );
    }

    #[test]
    fn rejects_invalid_changes() {
        assert_eq!(
            three_voters().apply(&ConfChange::leave_joint()),
            Err(ConfChangeError::NotJoint)
        );

        let single = ConfigState::with_voters(ids(&["a"]));
        assert_eq!(
            single.apply(&ConfChange::remove_node(ReplicaId::new("a"))),
            Err(ConfChangeError::NoVoters)
        );
    }
}
