use anyhow::Result;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::info;

use super::directory::{DirectoryTiming, MembershipDirectory};
use super::strategy::PartitionStrategy;
use super::types::{GossipMessage, Node, NodeId, NodeState};

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(1);
/// Every this many gossip ticks, unreached seeds get a fresh `Join` and one
/// unreachable member is probed so healed partitions reconnect.
const REJOIN_EVERY_TICKS: u64 = 4;

/// UDP gossip driver feeding a `MembershipDirectory`.
pub struct MembershipService {
    pub directory: Arc<MembershipDirectory>,
    socket: Arc<UdpSocket>,
}

impl MembershipService {
    pub async fn bind(
        bind_addr: SocketAddr,
        http_addr: SocketAddr,
        seed_nodes: Vec<SocketAddr>,
        strategy: Arc<dyn PartitionStrategy>,
        timing: DirectoryTiming,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let gossip_addr = socket.local_addr()?;
        let local_node = Node::new_local(gossip_addr, http_addr);

        let directory = MembershipDirectory::new(local_node.clone(), seed_nodes.clone(), strategy, timing);

        let seeds: Vec<SocketAddr> = seed_nodes
            .into_iter()
            .filter(|seed| *seed != gossip_addr)
            .collect();

        if !seeds.is_empty() {
            info!("Joining cluster via {} seed node(s)", seeds.len());

            for seed_node in seeds.iter() {
                let msg = GossipMessage::Join {
                    node: local_node.clone(),
                };

                let encoded = bincode::serialize(&msg)?;
                socket.send_to(&encoded, seed_node).await?;
                info!("Sent join request to {}", seed_node);
            }
        }

        Ok(Arc::new(Self {
            directory,
            socket: Arc::new(socket),
        }))
    }

    pub fn local_id(&self) -> &NodeId {
        self.directory.local_id()
    }

    pub fn gossip_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service...");

        let _gossip_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.gossip_loop().await;
            })
        };

        let _receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop().await;
            })
        };

        let _failure_detection_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.failure_detection_loop().await;
            })
        };

        tracing::info!("All background tasks started");
    }

    /// Announces a graceful departure to every reachable peer.
    pub async fn leave(&self) {
        let msg = self.directory.leave();
        self.broadcast_message(msg).await;
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);
        let mut tick: u64 = 0;

        loop {
            interval.tick().await;
            tick = tick.wrapping_add(1);

            let targets = self.directory.gossip_targets();
            let target = targets.choose(&mut rand::thread_rng()).cloned();
            if let Some(target) = target {
                self.ping(&target).await;
            }

            if tick % REJOIN_EVERY_TICKS == 0 {
                self.rejoin().await;
            }
        }
    }

    async fn rejoin(&self) {
        let unreached = self.directory.unreached_seeds();
        if !unreached.is_empty() {
            let msg = GossipMessage::Join {
                node: self.directory.local_node(),
            };
            for seed in unreached {
                self.send(&msg, seed).await;
            }
        }

        let unreachable = self.directory.unreachable_members();
        let probe = unreachable.choose(&mut rand::thread_rng()).cloned();
        if let Some(member) = probe {
            tracing::debug!("Probing unreachable member {}", member.id);
            self.ping(&member).await;
        }
    }

    async fn ping(&self, target: &Node) {
        let local = self.directory.local_node();
        let msg = GossipMessage::Ping {
            from: local.id,
            incarnation: self.directory.incarnation(),
            http_addr: local.http_addr,
            joined_at: local.joined_at,
        };

        self.send(&msg, target.gossip_addr).await;
        tracing::trace!("Sent ping to {}", target.id);
    }

    async fn send(&self, msg: &GossipMessage, addr: SocketAddr) {
        match bincode::serialize(msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, addr).await {
                    tracing::warn!("Failed to send gossip to {}: {}", addr, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize gossip message: {}", e),
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub(crate) async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping {
                from,
                incarnation,
                http_addr,
                joined_at,
            } => {
                tracing::trace!("Received ping from {}", from);

                if !self.directory.touch(&from, incarnation) {
                    tracing::info!("Discovered new member via ping: {} at {}", from, src);
                    self.directory.join(Node {
                        id: from,
                        gossip_addr: src,
                        http_addr,
                        state: NodeState::Alive,
                        incarnation,
                        joined_at,
                        last_seen: Some(Instant::now()),
                    });
                }

                self.send_ack(src).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                tracing::trace!(
                    "Received ack from {} (inc={}) with {} members",
                    from,
                    incarnation,
                    members.len()
                );

                for member in members {
                    if let Some(refutation) = self.directory.merge(member) {
                        self.broadcast_message(refutation).await;
                    }
                }
                self.directory.touch(&from, incarnation);
            }

            GossipMessage::Join { node } => {
                self.directory.join(node);
                self.send_ack(src).await?;
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                if let Some(refutation) = self.directory.suspect(&node_id, incarnation) {
                    self.broadcast_message(refutation).await;
                }
            }

            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.directory.alive(&node_id, incarnation);
            }

            GossipMessage::Leave { node_id } => {
                self.directory.remove_left(&node_id);
            }
        }

        Ok(())
    }

    async fn send_ack(&self, src: SocketAddr) -> Result<()> {
        let reply = GossipMessage::Ack {
            from: self.directory.local_id().clone(),
            incarnation: self.directory.incarnation(),
            members: self.directory.members(),
        };

        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, src).await?;
        Ok(())
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;

            let messages = self.directory.detect_failures(Instant::now());
            for msg in messages {
                self.broadcast_message(msg).await;
            }
        }
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        if let Ok(encoded) = bincode::serialize(&msg) {
            for member in self.directory.gossip_targets() {
                if let Err(e) = self.socket.send_to(&encoded, member.gossip_addr).await {
                    tracing::warn!("Failed to broadcast to {}: {}", member.id, e);
                }
            }
        }
    }
}
