//! Network Protocol Definitions
//!
//! DTOs for node-to-node command forwarding and reply delivery over HTTP.

use crate::dataset::types::DatasetCommand;
use crate::error::CommandError;
use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_FORWARD_COMMAND: &str = "/internal/command";
pub const ENDPOINT_REPLY: &str = "/internal/reply";

#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardCommandRequest {
    pub from: NodeId,
    pub command: DatasetCommand,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardResponse {
    pub accepted: bool,
    pub error: Option<CommandError>,
}

impl ForwardResponse {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            error: None,
        }
    }

    pub fn rejected(error: CommandError) -> Self {
        Self {
            accepted: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyResponse {
    pub delivered: bool,
}
