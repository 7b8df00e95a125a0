//! Command Error Taxonomy
//!
//! Errors that travel between the router, the dataset entities and the
//! coordinator. They are serializable because a rejection produced on one node
//! is often observed on another (forward responses, replies).

use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum CommandError {
    /// The dataset is owned by another node under the current view.
    /// The router re-resolves and redirects; the entity never does.
    #[error("dataset {dataset} moved to {owner:?}")]
    Moved {
        dataset: String,
        owner: Option<NodeId>,
    },

    /// This node sits in a minority partition (or has not converged yet).
    #[error("node is not authoritative for new ownership")]
    NotAuthoritative,

    /// No live node can own the dataset.
    #[error("no owner available: {0}")]
    Unavailable(String),

    /// The persistence collaborator failed to save the new state.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The index source could not be read or parsed.
    #[error("invalid index source: {0}")]
    Source(String),

    /// Delivery to a remote node failed.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The entity stopped before the command could be processed.
    #[error("entity is shutting down")]
    ShuttingDown,
}

impl CommandError {
    pub fn moved(dataset: impl ToString, owner: Option<NodeId>) -> Self {
        Self::Moved {
            dataset: dataset.to_string(),
            owner,
        }
    }

    pub fn is_moved(&self) -> bool {
        matches!(self, Self::Moved { .. })
    }
}
