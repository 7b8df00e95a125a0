//! Node-to-node delivery of commands and replies.
//!
//! `HttpTransport` is what a deployed node uses. `MemoryTransport` connects
//! nodes living in one process; every message still goes through a bincode
//! encode/decode so nothing is shared by reference.

use super::protocol::*;
use super::router::RequestRouter;
use crate::correlation::table::Correlations;
use crate::correlation::types::ReplyEnvelope;
use crate::dataset::types::DatasetCommand;
use crate::error::CommandError;
use crate::membership::types::{MemberStatus, Node, NodeId};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Address of a remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub http_addr: SocketAddr,
}

impl From<&MemberStatus> for Peer {
    fn from(member: &MemberStatus) -> Self {
        Self {
            id: member.id.clone(),
            http_addr: member.http_addr,
        }
    }
}

impl From<&Node> for Peer {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            http_addr: node.http_addr,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Hands `command` to `peer`'s router. Succeeds once the peer queued it.
    async fn forward(&self, from: &NodeId, peer: &Peer, command: DatasetCommand) -> Result<(), CommandError>;

    async fn reply(&self, peer: &Peer, envelope: ReplyEnvelope) -> Result<(), CommandError>;
}

// ============================================================================
// HTTP
// ============================================================================

const FORWARD_TIMEOUT: Duration = Duration::from_millis(500);
const FORWARD_ATTEMPTS: usize = 3;

pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        url: String,
        payload: &T,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response, CommandError> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(CommandError::Transport(format!("{}: {}", url, e)));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(CommandError::Transport("Retry attempts exhausted".to_string()))
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn forward(&self, from: &NodeId, peer: &Peer, command: DatasetCommand) -> Result<(), CommandError> {
        let url = format!("http://{}{}", peer.http_addr, ENDPOINT_FORWARD_COMMAND);
        let request = ForwardCommandRequest {
            from: from.clone(),
            command,
        };

        let resp = self
            .post_with_retry(url, &request, FORWARD_TIMEOUT, FORWARD_ATTEMPTS)
            .await?;
        let status = resp.status();

        // Rejections carry their reason in the body whatever the status code.
        match resp.json::<ForwardResponse>().await {
            Ok(ForwardResponse { accepted: true, .. }) => Ok(()),
            Ok(ForwardResponse { error: Some(e), .. }) => Err(e),
            Ok(_) => Err(CommandError::Transport(format!(
                "{} rejected command with {}",
                peer.id, status
            ))),
            Err(e) => Err(CommandError::Transport(format!(
                "{} answered {} with unreadable body: {}",
                peer.id, status, e
            ))),
        }
    }

    async fn reply(&self, peer: &Peer, envelope: ReplyEnvelope) -> Result<(), CommandError> {
        let url = format!("http://{}{}", peer.http_addr, ENDPOINT_REPLY);
        let resp = self
            .post_with_retry(url, &envelope, FORWARD_TIMEOUT, FORWARD_ATTEMPTS)
            .await?;

        if !resp.status().is_success() {
            return Err(CommandError::Transport(format!(
                "{} refused reply with {}",
                peer.id,
                resp.status()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// In-process
// ============================================================================

struct MemoryEndpoint {
    router: Weak<RequestRouter>,
    correlations: Arc<Correlations>,
}

/// Shared switchboard for nodes running in one process.
#[derive(Default)]
pub struct MemoryNetwork {
    endpoints: DashMap<NodeId, MemoryEndpoint>,
    isolated: DashSet<NodeId>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>, local: NodeId) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            local,
        }
    }

    pub fn register(&self, node: NodeId, router: &Arc<RequestRouter>, correlations: Arc<Correlations>) {
        self.endpoints.insert(
            node,
            MemoryEndpoint {
                router: Arc::downgrade(router),
                correlations,
            },
        );
    }

    /// Drops all traffic to and from `node` until `heal` is called.
    pub fn isolate(&self, node: &NodeId) {
        self.isolated.insert(node.clone());
    }

    pub fn heal(&self, node: &NodeId) {
        self.isolated.remove(node);
    }

    fn check_link(&self, from: &NodeId, to: &NodeId) -> Result<(), CommandError> {
        if self.isolated.contains(from) || self.isolated.contains(to) {
            return Err(CommandError::Transport(format!("link {} -> {} is down", from, to)));
        }
        Ok(())
    }

    fn router(&self, node: &NodeId) -> Result<Arc<RequestRouter>, CommandError> {
        self.endpoints
            .get(node)
            .and_then(|endpoint| endpoint.router.upgrade())
            .ok_or_else(|| CommandError::Transport(format!("no route to {}", node)))
    }

    fn correlations(&self, node: &NodeId) -> Result<Arc<Correlations>, CommandError> {
        self.endpoints
            .get(node)
            .map(|endpoint| endpoint.correlations.clone())
            .ok_or_else(|| CommandError::Transport(format!("no route to {}", node)))
    }
}

pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    local: NodeId,
}

/// Encodes and decodes a message the way it would cross the wire.
fn over_the_wire<T: Serialize + DeserializeOwned>(message: &T) -> Result<T, CommandError> {
    let bytes = bincode::serialize(message).map_err(|e| CommandError::Transport(e.to_string()))?;
    bincode::deserialize(&bytes).map_err(|e| CommandError::Transport(e.to_string()))
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn forward(&self, from: &NodeId, peer: &Peer, command: DatasetCommand) -> Result<(), CommandError> {
        self.network.check_link(&self.local, &peer.id)?;
        let router = self.network.router(&peer.id)?;

        tracing::trace!("{} forwarding {} for {} to {}", from, command.kind(), command.dataset(), peer.id);
        let command = over_the_wire(&command)?;
        router.accept_forwarded(command).await
    }

    async fn reply(&self, peer: &Peer, envelope: ReplyEnvelope) -> Result<(), CommandError> {
        self.network.check_link(&self.local, &peer.id)?;
        let correlations = self.network.correlations(&peer.id)?;

        correlations.deliver(over_the_wire(&envelope)?);
        Ok(())
    }
}
