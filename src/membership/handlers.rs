use super::directory::MembershipDirectory;
use super::types::{MemberStatus, NodeId};
use crate::dataset::registry::EntityRegistry;

use axum::{Extension, Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ENDPOINT_CLUSTER_STATUS: &str = "/cluster/status";

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterStatusResponse {
    pub self_node: NodeId,
    pub view_version: u64,
    pub authoritative: bool,
    pub converged: bool,
    pub leader: Option<NodeId>,
    pub members: Vec<MemberStatus>,
    pub reachable: Vec<NodeId>,
    pub unreachable: Vec<NodeId>,
    pub active_entities: usize,
    /// Failure-detection timing this node applies to its peers.
    pub suspect_after_ms: u64,
    pub stability_window_ms: u64,
}

pub fn cluster_status(directory: &MembershipDirectory, registry: &EntityRegistry) -> ClusterStatusResponse {
    let view = directory.current_view();
    let timing = directory.timing();
    ClusterStatusResponse {
        self_node: view.local.clone(),
        view_version: view.version,
        authoritative: view.authoritative,
        converged: view.converged,
        leader: view.leader().cloned(),
        members: view.members.clone(),
        reachable: view.reachable(),
        unreachable: view.unreachable(),
        active_entities: registry.active_count(),
        suspect_after_ms: timing.suspect_after.as_millis() as u64,
        stability_window_ms: timing.stability_window.as_millis() as u64,
    }
}

pub async fn handle_cluster_status(
    Extension(directory): Extension<Arc<MembershipDirectory>>,
    Extension(registry): Extension<Arc<EntityRegistry>>,
) -> (StatusCode, Json<ClusterStatusResponse>) {
    (StatusCode::OK, Json(cluster_status(&directory, &registry)))
}
