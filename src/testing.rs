//! Shared fixtures for in-process cluster tests.

use crate::cluster::{ClusterNode, NodeSettings};
use crate::correlation::table::PendingReplies;
use crate::correlation::types::{Reply, ReplyAddress};
use crate::dataset::types::{DatasetId, IndexSource};
use crate::membership::directory::{DirectoryTiming, MembershipDirectory};
use crate::membership::strategy::StrategyKind;
use crate::membership::types::Node;
use crate::persistence::store::MemoryStore;
use crate::router::transport::MemoryNetwork;
use crate::scoring::scorer::{ScoredText, Scorer};

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

// ============================================================================
// Scorers
// ============================================================================

/// Returns only the records it has a score for, best first.
pub struct ScriptedScorer {
    scores: HashMap<String, f32>,
}

impl ScriptedScorer {
    pub fn new(scores: &[(&str, f32)]) -> Arc<Self> {
        Arc::new(Self {
            scores: scores.iter().map(|(text, score)| (text.to_string(), *score)).collect(),
        })
    }
}

#[async_trait]
impl Scorer for ScriptedScorer {
    async fn rank(&self, _query: &str, candidates: &[String], top_k: usize) -> Result<Vec<ScoredText>> {
        let mut ranked: Vec<ScoredText> = candidates
            .iter()
            .filter_map(|c| self.scores.get(c).map(|score| ScoredText::new(c.clone(), *score)))
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

/// Echoes every record back, first record scoring highest.
pub struct EchoScorer;

#[async_trait]
impl Scorer for EchoScorer {
    async fn rank(&self, _query: &str, candidates: &[String], top_k: usize) -> Result<Vec<ScoredText>> {
        Ok(candidates
            .iter()
            .enumerate()
            .map(|(i, c)| ScoredText::new(c.clone(), 1.0 - i as f32 * 0.01))
            .take(top_k)
            .collect())
    }
}

pub struct FailingScorer;

#[async_trait]
impl Scorer for FailingScorer {
    async fn rank(&self, _query: &str, _candidates: &[String], _top_k: usize) -> Result<Vec<ScoredText>> {
        bail!("scorer backend unavailable")
    }
}

/// Sleeps before delegating whenever the candidates contain `record`.
pub struct DelayedScorer {
    pub inner: Arc<dyn Scorer>,
    pub record: String,
    pub delay: Duration,
}

#[async_trait]
impl Scorer for DelayedScorer {
    async fn rank(&self, query: &str, candidates: &[String], top_k: usize) -> Result<Vec<ScoredText>> {
        if candidates.contains(&self.record) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.rank(query, candidates, top_k).await
    }
}

/// Blocks every call until a permit is released.
pub struct GatedScorer {
    inner: Arc<dyn Scorer>,
    gate: Semaphore,
    entered: AtomicUsize,
}

impl GatedScorer {
    pub fn new(inner: Arc<dyn Scorer>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gate: Semaphore::new(0),
            entered: AtomicUsize::new(0),
        })
    }

    /// Calls that reached the gate so far.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }
}

#[async_trait]
impl Scorer for GatedScorer {
    async fn rank(&self, query: &str, candidates: &[String], top_k: usize) -> Result<Vec<ScoredText>> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        self.inner.rank(query, candidates, top_k).await
    }
}

// ============================================================================
// Clusters
// ============================================================================

pub struct TestCluster {
    pub network: Arc<MemoryNetwork>,
    pub store: Arc<MemoryStore>,
    pub nodes: Vec<ClusterNode>,
}

fn test_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Fully meshed in-memory cluster sharing one store. Every node already knows
/// every other node, so all views agree from the start.
pub fn cluster(size: usize, scorer: Arc<dyn Scorer>, settings: NodeSettings) -> TestCluster {
    cluster_with_strategy(size, scorer, settings, StrategyKind::Majority)
}

pub fn cluster_with_strategy(
    size: usize,
    scorer: Arc<dyn Scorer>,
    settings: NodeSettings,
    strategy: StrategyKind,
) -> TestCluster {
    let network = MemoryNetwork::new();
    let store = Arc::new(MemoryStore::new());

    let locals: Vec<Node> = (0..size)
        .map(|i| Node::new_local(test_addr(5000 + i as u16), test_addr(6000 + i as u16)))
        .collect();

    let directories: Vec<Arc<MembershipDirectory>> = locals
        .iter()
        .map(|local| {
            MembershipDirectory::new(local.clone(), Vec::new(), strategy.build(), DirectoryTiming::default())
        })
        .collect();

    for directory in &directories {
        for peer in &locals {
            directory.join(peer.clone());
        }
    }

    let nodes = directories
        .into_iter()
        .map(|directory| ClusterNode::in_memory(&network, directory, store.clone(), scorer.clone(), settings))
        .collect();

    TestCluster { network, store, nodes }
}

pub fn single_node(scorer: Arc<dyn Scorer>, settings: NodeSettings) -> TestCluster {
    cluster(1, scorer, settings)
}

impl TestCluster {
    /// First dataset id of the form `{prefix}-N` owned by `node`.
    pub fn dataset_owned_by(&self, node: usize, prefix: &str) -> DatasetId {
        let owner = &self.nodes[node];
        let view = owner.directory.current_view();
        (0..10_000)
            .map(|i| DatasetId::new(format!("{}-{}", prefix, i)))
            .find(|dataset| owner.resolver.is_local(dataset, &view))
            .expect("some dataset maps to every node")
    }

    pub async fn index(&self, via: usize, dataset: &DatasetId, records: &[&str]) -> usize {
        let records = records.iter().map(|r| r.to_string()).collect();
        self.nodes[via]
            .coordinator
            .index_dataset(dataset.clone(), IndexSource::Records(records))
            .await
            .expect("index succeeds")
    }
}

pub fn reply_address(node: &ClusterNode, pending: &PendingReplies) -> ReplyAddress {
    ReplyAddress {
        node: node.local_id().clone(),
        request_id: pending.request_id().clone(),
    }
}

pub async fn next_reply(pending: &mut PendingReplies) -> Reply {
    pending
        .next_before(Instant::now() + Duration::from_secs(5))
        .await
        .expect("reply before deadline")
}

/// Polls `condition` until it holds or two seconds passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
