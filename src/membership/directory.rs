//! Membership Directory
//!
//! Holds the node's knowledge of the cluster and turns it into versioned
//! `MembershipView`s. The directory has no I/O of its own: the gossip service
//! (or a test) feeds it contacts and failure-detection ticks, and everyone
//! else reads the published views.

use super::strategy::{PartitionMember, PartitionStrategy};
use super::types::{GossipMessage, MemberStatus, MembershipView, Node, NodeId, NodeState, Role};

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

const VIEW_EVENTS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct DirectoryTiming {
    /// Silence after which an alive member becomes suspect.
    pub suspect_after: Duration,
    /// Silence after which a member is declared unreachable.
    pub stability_window: Duration,
}

impl Default for DirectoryTiming {
    fn default() -> Self {
        Self {
            suspect_after: Duration::from_secs(5),
            stability_window: Duration::from_secs(15),
        }
    }
}

pub struct MembershipDirectory {
    local_id: NodeId,
    local_gossip_addr: SocketAddr,
    members: DashMap<NodeId, Node>,
    /// Downed members and the incarnation they were downed at.
    downed: DashMap<NodeId, u64>,
    seeds: Vec<SocketAddr>,
    converged: AtomicBool,
    incarnation: AtomicU64,
    strategy: Arc<dyn PartitionStrategy>,
    timing: DirectoryTiming,
    view_tx: watch::Sender<Arc<MembershipView>>,
    events: broadcast::Sender<Arc<MembershipView>>,
    refresh_lock: Mutex<()>,
}

impl MembershipDirectory {
    pub fn new(
        local: Node,
        seeds: Vec<SocketAddr>,
        strategy: Arc<dyn PartitionStrategy>,
        timing: DirectoryTiming,
    ) -> Arc<Self> {
        let local_id = local.id.clone();
        let local_gossip_addr = local.gossip_addr;
        let incarnation = AtomicU64::new(local.incarnation);

        let members = DashMap::new();
        members.insert(local_id.clone(), local);

        let (view_tx, _) = watch::channel(Arc::new(MembershipView::empty(local_id.clone())));
        let (events, _) = broadcast::channel(VIEW_EVENTS_CAPACITY);

        let directory = Arc::new(Self {
            local_id,
            local_gossip_addr,
            members,
            downed: DashMap::new(),
            converged: AtomicBool::new(seeds.is_empty()),
            seeds,
            incarnation,
            strategy,
            timing,
            view_tx,
            events,
            refresh_lock: Mutex::new(()),
        });

        tracing::info!(
            "Membership directory for {} using '{}' partition strategy",
            directory.local_id,
            directory.strategy.name()
        );

        directory.refresh();
        directory
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn local_node(&self) -> Node {
        match self.members.get(&self.local_id) {
            Some(node) => node.clone(),
            None => unreachable!("local node is never removed from the directory"),
        }
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::SeqCst)
    }

    pub fn timing(&self) -> DirectoryTiming {
        self.timing
    }

    pub fn current_view(&self) -> Arc<MembershipView> {
        self.view_tx.borrow().clone()
    }

    /// Latest-value channel; intermediate views may be coalesced.
    pub fn watch(&self) -> watch::Receiver<Arc<MembershipView>> {
        self.view_tx.subscribe()
    }

    /// Every published view, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<MembershipView>> {
        self.events.subscribe()
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn members(&self) -> Vec<Node> {
        self.members.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn is_downed(&self, id: &NodeId) -> bool {
        self.downed.contains_key(id)
    }

    /// Reachable peers worth pinging.
    pub fn gossip_targets(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.key() != &self.local_id && entry.value().state.is_reachable())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn unreachable_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| !entry.value().state.is_reachable())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Seed addresses that are neither this node nor a reachable member.
    pub fn unreached_seeds(&self) -> Vec<SocketAddr> {
        let reachable: Vec<SocketAddr> = self
            .members
            .iter()
            .filter(|entry| entry.value().state.is_reachable())
            .map(|entry| entry.value().gossip_addr)
            .collect();

        self.seeds
            .iter()
            .filter(|seed| **seed != self.local_gossip_addr && !reachable.contains(seed))
            .copied()
            .collect()
    }

    pub fn is_converged(&self) -> bool {
        if self.converged.load(Ordering::SeqCst) {
            return true;
        }

        let reached = self.seeds.len() - self.unreached_seeds().len();
        let quorum = self.seeds.len() / 2 + 1;
        if reached >= quorum {
            self.converged.store(true, Ordering::SeqCst);
            tracing::info!("Membership converged ({}/{} seeds reachable)", reached, self.seeds.len());
            return true;
        }

        false
    }

    /// Direct contact from a node that announced itself. Always revives it.
    pub fn join(&self, mut node: Node) {
        if node.id == self.local_id {
            return;
        }

        if self.downed.remove(&node.id).is_some() {
            tracing::info!("Downed node {} rejoined at {}", node.id, node.gossip_addr);
        }

        node.last_seen = Some(Instant::now());
        if node.state != NodeState::Leaving {
            node.state = NodeState::Alive;
        }

        match self.members.get_mut(&node.id) {
            Some(mut existing) => {
                existing.gossip_addr = node.gossip_addr;
                existing.http_addr = node.http_addr;
                existing.incarnation = existing.incarnation.max(node.incarnation);
                existing.state = node.state;
                existing.last_seen = node.last_seen;
            }
            None => {
                tracing::info!("Node {} joining cluster at {}", node.id, node.gossip_addr);
                self.members.insert(node.id.clone(), node);
                tracing::info!("Cluster size now: {}", self.members.len());
            }
        }

        self.refresh();
    }

    /// Records a ping or ack from a known member. Returns false when the
    /// sender is unknown so the caller can introduce it with `join`.
    pub fn touch(&self, from: &NodeId, incarnation: u64) -> bool {
        if from == &self.local_id {
            return true;
        }

        let changed = match self.members.get_mut(from) {
            Some(mut member) => {
                member.last_seen = Some(Instant::now());
                member.incarnation = member.incarnation.max(incarnation);

                if matches!(member.state, NodeState::Suspect | NodeState::Dead) {
                    tracing::info!("Node {} is reachable again", member.id);
                    member.state = NodeState::Alive;
                    true
                } else {
                    false
                }
            }
            None => return false,
        };

        if changed {
            self.refresh();
        }
        true
    }

    /// Merges a member learned through gossip. Returns an `Alive` message when
    /// the gossip suspects this node and it has to refute.
    pub fn merge(&self, new_member: Node) -> Option<GossipMessage> {
        if new_member.id == self.local_id {
            if matches!(new_member.state, NodeState::Suspect | NodeState::Dead)
                && new_member.incarnation >= self.incarnation()
            {
                return Some(self.refute());
            }
            return None;
        }

        if let Some(tombstone) = self.downed.get(&new_member.id).map(|t| *t.value()) {
            if new_member.incarnation <= tombstone {
                return None;
            }
            self.downed.remove(&new_member.id);
        }

        let changed = match self.members.get_mut(&new_member.id) {
            Some(mut existing) => {
                if new_member.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {}: inc {} -> {}",
                        new_member.id,
                        existing.incarnation,
                        new_member.incarnation,
                    );

                    // Reachability is decided by the local failure detector only.
                    if new_member.state != NodeState::Dead {
                        existing.state = new_member.state;
                        existing.last_seen = Some(Instant::now());
                    }
                    existing.incarnation = new_member.incarnation;
                    true
                } else if new_member.incarnation == existing.incarnation
                    && new_member.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!("{} refuted suspicion", new_member.id);
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
            None => {
                if new_member.state == NodeState::Dead {
                    return None;
                }

                tracing::info!(
                    "Discovered new member: {} at {}",
                    new_member.id,
                    new_member.gossip_addr
                );

                let mut member = new_member;
                member.last_seen = Some(Instant::now());
                self.members.insert(member.id.clone(), member);
                true
            }
        };

        if changed {
            self.refresh();
        }
        None
    }

    pub fn suspect(&self, node_id: &NodeId, incarnation: u64) -> Option<GossipMessage> {
        if node_id == &self.local_id {
            if incarnation >= self.incarnation() {
                tracing::info!("Refuting suspicion about this node (inc={})", incarnation);
                return Some(self.refute());
            }
            return None;
        }

        let changed = match self.members.get_mut(node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive {
                    tracing::info!("Node {} at {} suspected", existing.id, existing.gossip_addr);
                    existing.state = NodeState::Suspect;
                    existing.incarnation = incarnation;
                    true
                } else {
                    false
                }
            }
            None => {
                tracing::debug!("Suspected node {} doesn't exist", node_id);
                false
            }
        };

        if changed {
            self.refresh();
        }
        None
    }

    pub fn alive(&self, node_id: &NodeId, incarnation: u64) {
        let changed = match self.members.get_mut(node_id) {
            Some(mut existing) => {
                let refuted = incarnation == existing.incarnation
                    && existing.state == NodeState::Suspect;

                if incarnation > existing.incarnation || refuted {
                    tracing::info!(
                        "Node {} at {} is now Alive (inc={})",
                        existing.id,
                        existing.gossip_addr,
                        incarnation
                    );
                    let was = existing.state;
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                    was != NodeState::Alive
                } else {
                    false
                }
            }
            None => {
                tracing::debug!("Alive message for unknown node {}", node_id);
                false
            }
        };

        if changed {
            self.refresh();
        }
    }

    /// Marks this node as leaving and returns the announcement to broadcast.
    pub fn leave(&self) -> GossipMessage {
        let incarnation = self.incarnation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(mut local) = self.members.get_mut(&self.local_id) {
            local.state = NodeState::Leaving;
            local.incarnation = incarnation;
        }
        tracing::info!("Node {} is leaving the cluster", self.local_id);
        self.refresh();

        GossipMessage::Leave {
            node_id: self.local_id.clone(),
        }
    }

    /// A peer announced a graceful leave.
    pub fn remove_left(&self, node_id: &NodeId) {
        if node_id == &self.local_id {
            return;
        }
        if self.down(node_id) {
            tracing::info!("Node {} left the cluster", node_id);
            self.refresh();
        }
    }

    /// Runs one failure-detection pass against `now` and returns the
    /// suspicion messages to disseminate.
    pub fn detect_failures(&self, now: Instant) -> Vec<GossipMessage> {
        let mut messages_to_broadcast = Vec::new();
        let mut changed = false;

        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();

            if member.id == self.local_id {
                continue;
            }

            let Some(last_seen) = member.last_seen else {
                member.last_seen = Some(now);
                continue;
            };
            let elapsed = now.saturating_duration_since(last_seen);

            match member.state {
                NodeState::Alive => {
                    if elapsed > self.timing.suspect_after {
                        tracing::warn!("Node {} suspected (no contact for {:?})", member.id, elapsed);
                        member.state = NodeState::Suspect;
                        messages_to_broadcast.push(GossipMessage::Suspect {
                            node_id: member.id.clone(),
                            incarnation: member.incarnation,
                        });
                        changed = true;
                    }
                }
                NodeState::Suspect | NodeState::Leaving => {
                    if elapsed > self.timing.stability_window {
                        tracing::warn!(
                            "Node {} declared unreachable (no contact for {:?})",
                            member.id,
                            elapsed
                        );
                        member.state = NodeState::Dead;
                        changed = true;
                    }
                }
                NodeState::Dead => {}
            }
        }

        if self.resolve_partition() {
            changed = true;
        }

        if changed {
            self.refresh();
        }

        messages_to_broadcast
    }

    /// Downs unreachable members when this side is authoritative. A minority
    /// keeps them so the full membership stays the reference.
    fn resolve_partition(&self) -> bool {
        let dead: Vec<NodeId> = self
            .members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Dead)
            .map(|entry| entry.key().clone())
            .collect();

        if dead.is_empty() {
            return false;
        }

        if !self.is_converged() || !self.strategy.is_authoritative(&self.partition_members()) {
            tracing::warn!(
                "Minority partition: {} unreachable member(s) kept, ownership claims refused",
                dead.len()
            );
            return false;
        }

        for id in &dead {
            tracing::info!("Downing unreachable node {}", id);
            self.down(id);
        }
        true
    }

    fn down(&self, id: &NodeId) -> bool {
        match self.members.remove(id) {
            Some((_, node)) => {
                self.downed.insert(node.id, node.incarnation);
                true
            }
            None => false,
        }
    }

    fn refute(&self) -> GossipMessage {
        let incarnation = self.incarnation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(mut local) = self.members.get_mut(&self.local_id) {
            local.incarnation = incarnation;
        }

        GossipMessage::Alive {
            node_id: self.local_id.clone(),
            incarnation,
        }
    }

    fn partition_members(&self) -> Vec<PartitionMember> {
        self.members
            .iter()
            .map(|entry| PartitionMember {
                id: entry.key().clone(),
                joined_at: entry.value().joined_at,
                reachable: entry.value().state.is_reachable(),
            })
            .collect()
    }

    fn build_view(&self) -> MembershipView {
        let converged = self.is_converged();
        let authoritative = converged && self.strategy.is_authoritative(&self.partition_members());

        let mut nodes = self.members();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let leader = if authoritative {
            nodes
                .iter()
                .filter(|node| node.state.is_reachable() && node.state != NodeState::Leaving)
                .min_by(|a, b| a.age_key().cmp(&b.age_key()))
                .map(|node| node.id.clone())
        } else {
            None
        };

        let members = nodes
            .into_iter()
            .map(|node| {
                let reachable = node.state.is_reachable();
                let role = if !reachable {
                    Role::Unknown
                } else if leader.as_ref() == Some(&node.id) {
                    Role::Leader
                } else {
                    Role::Follower
                };

                MemberStatus {
                    id: node.id,
                    gossip_addr: node.gossip_addr,
                    http_addr: node.http_addr,
                    joined_at: node.joined_at,
                    reachable,
                    leaving: node.state == NodeState::Leaving,
                    role,
                }
            })
            .collect();

        MembershipView {
            version: 0,
            local: self.local_id.clone(),
            members,
            authoritative,
            converged,
        }
    }

    /// Publishes a new view when the topology changed. Versions only grow.
    pub fn refresh(&self) {
        let _guard = self
            .refresh_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let candidate = self.build_view();
        let mut published = None;

        self.view_tx.send_if_modified(|current| {
            if current.version > 0 && current.same_topology(&candidate) {
                return false;
            }
            let mut next = candidate;
            next.version = current.version + 1;
            let next = Arc::new(next);
            *current = next.clone();
            published = Some(next);
            true
        });

        if let Some(view) = published {
            tracing::info!(
                "Membership view v{}: {} live, {} unreachable, authoritative={}",
                view.version,
                view.live_nodes().len(),
                view.unreachable().len(),
                view.authoritative
            );
            // No subscribers is fine.
            let _ = self.events.send(view);
        }
    }
}
