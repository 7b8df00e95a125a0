use crate::dataset::types::DatasetId;
use crate::error::CommandError;
use crate::membership::types::{MembershipView, NodeId};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use sha2::{Digest, Sha256};

const DEFAULT_VIRTUAL_NODES: usize = 64;

/// Consistent hash ring over the live node set.
#[derive(Debug)]
struct HashRing {
    ring: BTreeMap<u64, NodeId>,
}

impl HashRing {
    /// `nodes` must be sorted so every process inserts in the same order.
    fn build(nodes: &[NodeId], virtual_nodes: usize) -> Self {
        let mut ring = BTreeMap::new();
        for node in nodes {
            for i in 0..virtual_nodes {
                let key = format!("{}#{}", node.0, i);
                ring.insert(hash_key(&key), node.clone());
            }
        }
        Self { ring }
    }

    fn get(&self, key: &str) -> Option<&NodeId> {
        let hash = hash_key(key);

        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node)
    }
}

/// Stable across processes and platforms, unlike `DefaultHasher`.
fn hash_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Maps a dataset to exactly one owning node for a given view.
///
/// The result depends only on the dataset id and the sorted live-node set of
/// the view, so all nodes holding the same view agree without talking.
pub struct OwnershipResolver {
    virtual_nodes: usize,
    cached: Mutex<Option<(Vec<NodeId>, Arc<HashRing>)>>,
}

impl OwnershipResolver {
    pub fn new() -> Self {
        Self::with_virtual_nodes(DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_virtual_nodes(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            cached: Mutex::new(None),
        }
    }

    pub fn owner_of(&self, dataset: &DatasetId, view: &MembershipView) -> Option<NodeId> {
        let live = view.live_nodes();
        if live.is_empty() {
            return None;
        }
        self.ring_for(live).get(dataset.as_str()).cloned()
    }

    pub fn is_local(&self, dataset: &DatasetId, view: &MembershipView) -> bool {
        self.owner_of(dataset, view).as_ref() == Some(&view.local)
    }

    /// Confirms this node may process commands for `dataset` under `view`.
    pub fn check_local(&self, dataset: &DatasetId, view: &MembershipView) -> Result<(), CommandError> {
        if !view.authoritative {
            return Err(CommandError::NotAuthoritative);
        }

        match self.owner_of(dataset, view) {
            Some(owner) if owner == view.local => Ok(()),
            Some(owner) => Err(CommandError::moved(dataset, Some(owner))),
            None => Err(CommandError::Unavailable(format!(
                "no live node for dataset {}",
                dataset
            ))),
        }
    }

    /// Datasets whose owner differs between two views.
    pub fn moved_between<'a>(
        &self,
        datasets: impl IntoIterator<Item = &'a DatasetId>,
        old: &MembershipView,
        new: &MembershipView,
    ) -> Vec<DatasetId> {
        datasets
            .into_iter()
            .filter(|dataset| self.owner_of(dataset, old) != self.owner_of(dataset, new))
            .cloned()
            .collect()
    }

    fn ring_for(&self, live: Vec<NodeId>) -> Arc<HashRing> {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some((nodes, ring)) = cached.as_ref()
            && *nodes == live
        {
            return ring.clone();
        }

        tracing::debug!("Rebuilding ownership ring for {} live node(s)", live.len());
        let ring = Arc::new(HashRing::build(&live, self.virtual_nodes));
        *cached = Some((live, ring.clone()));
        ring
    }
}

impl Default for OwnershipResolver {
    fn default() -> Self {
        Self::new()
    }
}
