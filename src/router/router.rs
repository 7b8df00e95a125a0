use super::transport::{Peer, Transport};
use crate::correlation::table::{Correlations, ReplySink};
use crate::correlation::types::{Reply, ReplyAddress, ReplyEnvelope};
use crate::dataset::registry::EntityRegistry;
use crate::dataset::types::DatasetCommand;
use crate::error::CommandError;
use crate::membership::directory::MembershipDirectory;
use crate::membership::types::NodeId;
use crate::ownership::resolver::OwnershipResolver;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RouterSettings {
    /// How many times a `Moved` rejection is re-resolved before giving up.
    pub max_redirects: usize,
    pub redirect_backoff: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_redirects: 3,
            redirect_backoff: Duration::from_millis(100),
        }
    }
}

/// Delivers dataset commands to the entity on the owning node.
///
/// Callers never know where a dataset lives. The router resolves the owner
/// from the current view, delivers locally or forwards, and follows `Moved`
/// rejections a bounded number of times while views converge.
pub struct RequestRouter {
    local: NodeId,
    directory: Arc<MembershipDirectory>,
    resolver: Arc<OwnershipResolver>,
    registry: Arc<EntityRegistry>,
    transport: Arc<dyn Transport>,
    settings: RouterSettings,
}

impl RequestRouter {
    pub fn new(
        directory: Arc<MembershipDirectory>,
        resolver: Arc<OwnershipResolver>,
        registry: Arc<EntityRegistry>,
        transport: Arc<dyn Transport>,
        settings: RouterSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            local: directory.local_id().clone(),
            directory,
            resolver,
            registry,
            transport,
            settings,
        })
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> RouterSettings {
        self.settings
    }

    /// Delivers `command` to its owner. Returns the node that accepted it.
    pub async fn route(&self, command: DatasetCommand) -> Result<NodeId, CommandError> {
        let dataset = command.dataset().clone();
        let mut last_error = None;

        for attempt in 0..=self.settings.max_redirects {
            if attempt > 0 {
                tokio::time::sleep(self.settings.redirect_backoff * attempt as u32).await;
            }

            let view = self.directory.current_view();

            // Minority side: only the local registry may serve (stale) reads.
            if !view.authoritative {
                self.registry.deliver(command).await?;
                return Ok(self.local.clone());
            }

            let owner = self.resolver.owner_of(&dataset, &view).ok_or_else(|| {
                CommandError::Unavailable(format!("no live node for dataset {}", dataset))
            })?;

            let delivered = if owner == self.local {
                self.registry.deliver(command.clone()).await
            } else {
                let peer = view
                    .member(&owner)
                    .map(Peer::from)
                    .ok_or_else(|| CommandError::Unavailable(format!("owner {} left the view", owner)))?;
                self.transport.forward(&self.local, &peer, command.clone()).await
            };

            match delivered {
                Ok(()) => {
                    tracing::trace!("Routed {} for {} to {}", command.kind(), dataset, owner);
                    return Ok(owner);
                }
                Err(e @ CommandError::Moved { .. }) => {
                    tracing::debug!(
                        "{} for {} bounced from {} (attempt {}): {}",
                        command.kind(),
                        dataset,
                        owner,
                        attempt + 1,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            "Giving up on {} for {} after {} redirect(s)",
            command.kind(),
            dataset,
            self.settings.max_redirects
        );
        Err(last_error.unwrap_or_else(|| CommandError::moved(&dataset, None)))
    }

    /// Entry point for commands forwarded by other nodes. Never forwards again:
    /// a command for a dataset this node does not own is bounced as `Moved`.
    pub async fn accept_forwarded(&self, command: DatasetCommand) -> Result<(), CommandError> {
        self.registry.deliver(command).await
    }
}

/// Sends entity replies back to the node waiting for them.
pub struct ReplyDispatcher {
    local: NodeId,
    directory: Arc<MembershipDirectory>,
    correlations: Arc<Correlations>,
    transport: Arc<dyn Transport>,
}

impl ReplyDispatcher {
    pub fn new(
        directory: Arc<MembershipDirectory>,
        correlations: Arc<Correlations>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            local: directory.local_id().clone(),
            directory,
            correlations,
            transport,
        }
    }
}

#[async_trait]
impl ReplySink for ReplyDispatcher {
    async fn reply(&self, to: ReplyAddress, reply: Reply) {
        let envelope = ReplyEnvelope {
            request_id: to.request_id,
            reply,
        };

        if to.node == self.local {
            self.correlations.deliver(envelope);
            return;
        }

        let Some(node) = self.directory.get_member(&to.node) else {
            tracing::warn!("Dropping reply for unknown node {}", to.node);
            return;
        };

        if let Err(e) = self.transport.reply(&Peer::from(&node), envelope).await {
            tracing::warn!("Failed to deliver reply to {}: {}", to.node, e);
        }
    }
}
