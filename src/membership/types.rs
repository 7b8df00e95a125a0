use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
    /// Announced a graceful leave; still up but no longer takes ownership.
    Leaving,
}

impl NodeState {
    /// Suspect members are still reachable: the stability window has not
    /// elapsed yet.
    pub fn is_reachable(self) -> bool {
        !matches!(self, NodeState::Dead)
    }
}

/// Represents a single member in the cluster.
///
/// Contains identity, network addressing, and current lifecycle state.
/// The `incarnation` field is a logical clock used to order updates and resolve conflicts
/// (e.g., refuting a false "Suspect" claim). `joined_at` orders members by age for the
/// keep-oldest strategy and leader selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,
    pub joined_at: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Node {
    pub fn new_local(gossip_addr: SocketAddr, http_addr: SocketAddr) -> Self {
        Self {
            id: NodeId::new(),
            gossip_addr,
            http_addr,
            state: NodeState::Alive,
            incarnation: 1,
            joined_at: now_ms(),
            last_seen: Some(Instant::now()),
        }
    }

    /// Age ordering key: older first, id breaks ties.
    pub fn age_key(&self) -> (u64, &NodeId) {
        (self.joined_at, &self.id)
    }
}

/// The wire protocol for inter-node communication.
///
/// - `Ping/Ack`: Used for liveness checks and state synchronization.
/// - `Join`: Sent by new nodes to seed nodes to enter the cluster.
/// - `Suspect/Alive`: Disseminates changes in node health.
/// - `Leave`: Graceful departure; receivers down the node right away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeId,
        incarnation: u64,
        http_addr: SocketAddr,
        joined_at: u64,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    Join {
        node: Node,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },

    Leave {
        node_id: NodeId,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberStatus {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub joined_at: u64,
    pub reachable: bool,
    pub leaving: bool,
    pub role: Role,
}

/// Snapshot of the cluster as seen by one node.
///
/// Published by the membership directory only; everybody else reads it.
/// Members are sorted by id so two nodes with the same knowledge build
/// identical views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipView {
    pub version: u64,
    pub local: NodeId,
    pub members: Vec<MemberStatus>,
    pub authoritative: bool,
    pub converged: bool,
}

impl MembershipView {
    pub fn empty(local: NodeId) -> Self {
        Self {
            version: 0,
            local,
            members: Vec::new(),
            authoritative: false,
            converged: false,
        }
    }

    /// Sorted ids of members that may own datasets.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|m| m.reachable && !m.leaving)
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn member(&self, id: &NodeId) -> Option<&MemberStatus> {
        self.members.iter().find(|m| &m.id == id)
    }

    pub fn leader(&self) -> Option<&NodeId> {
        self.members
            .iter()
            .find(|m| m.role == Role::Leader)
            .map(|m| &m.id)
    }

    pub fn reachable(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|m| m.reachable)
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn unreachable(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|m| !m.reachable)
            .map(|m| m.id.clone())
            .collect()
    }

    /// Equality ignoring the version number.
    pub fn same_topology(&self, other: &MembershipView) -> bool {
        self.local == other.local
            && self.authoritative == other.authoritative
            && self.converged == other.converged
            && self.members == other.members
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
