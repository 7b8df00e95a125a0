//! Split-brain resolution strategies.
//!
//! After a partition every side evaluates the last known full membership
//! with the configured strategy. Only a side the strategy accepts may hand
//! out new ownership.

use super::types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// One entry of the last known full membership, as seen from this side.
#[derive(Debug, Clone)]
pub struct PartitionMember {
    pub id: NodeId,
    pub joined_at: u64,
    pub reachable: bool,
}

pub trait PartitionStrategy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Decides whether the reachable subset of `members` is authoritative.
    fn is_authoritative(&self, members: &[PartitionMember]) -> bool;
}

/// Authoritative iff strictly more than half of the membership is reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct MajorityStrategy;

impl PartitionStrategy for MajorityStrategy {
    fn name(&self) -> &'static str {
        "majority"
    }

    fn is_authoritative(&self, members: &[PartitionMember]) -> bool {
        let reachable = members.iter().filter(|m| m.reachable).count();
        reachable * 2 > members.len()
    }
}

/// Authoritative iff the oldest member is on this side.
///
/// Resolves even splits deterministically; the side holding the oldest node
/// survives regardless of its size.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepOldestStrategy;

impl PartitionStrategy for KeepOldestStrategy {
    fn name(&self) -> &'static str {
        "keep-oldest"
    }

    fn is_authoritative(&self, members: &[PartitionMember]) -> bool {
        members
            .iter()
            .min_by(|a, b| (a.joined_at, &a.id).cmp(&(b.joined_at, &b.id)))
            .map(|oldest| oldest.reachable)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum StrategyKind {
    Majority,
    KeepOldest,
}

impl StrategyKind {
    pub fn build(self) -> Arc<dyn PartitionStrategy> {
        match self {
            StrategyKind::Majority => Arc::new(MajorityStrategy),
            StrategyKind::KeepOldest => Arc::new(KeepOldestStrategy),
        }
    }
}
