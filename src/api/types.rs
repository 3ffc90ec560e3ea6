use crate::commitlog::Index;
use crate::replica::Term;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Position of an entry in the replicated log. Entries with equal ids are the same entry on every
/// replica.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RaftEntryId {
    pub(crate) term: Term,
    pub(crate) entry_index: Index,
}

impl RaftEntryId {
    pub fn term(&self) -> u64 {
        self.term.as_u64()
    }

    pub fn index(&self) -> u64 {
        self.entry_index.as_u64()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftMemberInfo {
    pub replica_id: String,
    pub ip_addr: Ipv4Addr,
    pub raft_internal_rpc_port: u16,
    pub peer_redirect_info_blob: RaftMemberInfoBlob,
}

impl RaftMemberInfo {
    pub fn raft_rpc_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_addr, self.raft_internal_rpc_port))
    }
}

/// Where to send a request that this replica, as a non-leader, turned down.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftLeaderInfo {
    pub replica_id: String,
    /// Known for bootstrap members and members added through this replica.
    pub member_info: Option<RaftMemberInfo>,
}

/// We allow application layer to provide an arbitrary blob of info about each member
/// that will be returned back to the application layer if we leader-redirect the
/// application to that member.
#[derive(Copy, Clone, Debug, Default, Eq, PartialOrd, PartialEq)]
pub struct RaftMemberInfoBlob(u128);

impl RaftMemberInfoBlob {
    pub fn new(blob: u128) -> Self {
        RaftMemberInfoBlob(blob)
    }

    pub fn into_inner(self) -> u128 {
        self.0
    }
}

/// One membership change. Changing more than one voter at once goes through a joint
/// configuration, which the leader leaves on its own once the change is applied.
#[derive(Clone, Debug)]
pub enum RaftMembershipChange {
    AddVoter(RaftMemberInfo),
    AddLearner(RaftMemberInfo),
    Remove(String),
}
