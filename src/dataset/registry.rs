use super::entity::{DatasetEntity, EntityContext};
use super::types::{DatasetCommand, DatasetId};
use crate::error::CommandError;
use crate::membership::types::MembershipView;

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

struct EntityHandle {
    generation: u64,
    inbox: mpsc::Sender<DatasetCommand>,
    revoke: watch::Sender<Option<CommandError>>,
}

/// Active entities on this node, keyed by dataset.
///
/// At most one entity per dataset is live at a time. Entities are created on
/// the first command for a locally owned dataset and remove themselves when
/// they stop; the generation number keeps a stopping entity from removing its
/// successor.
pub struct EntityRegistry {
    entities: DashMap<DatasetId, EntityHandle>,
    next_generation: AtomicU64,
    ctx: Arc<EntityContext>,
}

impl EntityRegistry {
    pub fn new(ctx: EntityContext) -> Arc<Self> {
        Arc::new(Self {
            entities: DashMap::new(),
            next_generation: AtomicU64::new(1),
            ctx: Arc::new(ctx),
        })
    }

    /// Queues `command` for its dataset's entity, starting one if needed.
    ///
    /// Fails without queuing when this node may not process the command.
    /// Waits while the entity's inbox is full.
    pub async fn deliver(self: &Arc<Self>, command: DatasetCommand) -> Result<(), CommandError> {
        let dataset = command.dataset().clone();
        self.ctx.admit(&command, self.is_active(&dataset))?;

        let mut command = command;
        // A second attempt covers an entity that stopped between lookup and send.
        for _ in 0..2 {
            let (generation, inbox) = self.handle_for(&dataset);
            match inbox.send(command).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    self.release(&dataset, generation);
                    command = returned;
                }
            }
        }

        tracing::warn!("Entity for {} kept stopping, giving up", dataset);
        Err(CommandError::ShuttingDown)
    }

    /// Asks an active entity to unload. Returns false if none is running.
    pub async fn evict(&self, dataset: &DatasetId) -> bool {
        let inbox = self
            .entities
            .get(dataset)
            .map(|entry| entry.inbox.clone());

        match inbox {
            Some(inbox) => inbox
                .send(DatasetCommand::Evict {
                    dataset: dataset.clone(),
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    pub fn is_active(&self, dataset: &DatasetId) -> bool {
        self.entities.contains_key(dataset)
    }

    pub fn active_count(&self) -> usize {
        self.entities.len()
    }

    pub fn active_datasets(&self) -> Vec<DatasetId> {
        let mut ids: Vec<DatasetId> = self.entities.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stops every entity this node no longer owns under `view`.
    pub fn revoke_lost(&self, view: &MembershipView) -> usize {
        let mut revoked = 0;
        for entry in self.entities.iter() {
            let reason = match self.ctx.resolver.check_local(entry.key(), view) {
                Ok(()) => continue,
                Err(CommandError::NotAuthoritative) if self.ctx.settings.allow_stale_reads => continue,
                Err(reason) => reason,
            };
            tracing::info!("Handing off {}: {}", entry.key(), reason);
            entry.revoke.send_replace(Some(reason));
            revoked += 1;
        }
        revoked
    }

    /// Re-checks ownership of active entities whenever a new view is published.
    pub fn spawn_handoff_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let mut views = self.ctx.directory.watch();

        tokio::spawn(async move {
            while views.changed().await.is_ok() {
                let view = views.borrow_and_update().clone();
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let revoked = registry.revoke_lost(&view);
                if revoked > 0 {
                    tracing::info!("View v{} revoked {} entit(ies)", view.version, revoked);
                }
            }
        })
    }

    fn handle_for(self: &Arc<Self>, dataset: &DatasetId) -> (u64, mpsc::Sender<DatasetCommand>) {
        let entry = self
            .entities
            .entry(dataset.clone())
            .or_insert_with(|| self.spawn(dataset.clone()));
        (entry.generation, entry.inbox.clone())
    }

    fn spawn(self: &Arc<Self>, dataset: DatasetId) -> EntityHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (inbox_tx, inbox_rx) = mpsc::channel(self.ctx.settings.inbox_capacity.max(1));
        let (revoke_tx, revoke_rx) = watch::channel(None);

        let entity = DatasetEntity::new(dataset.clone(), generation, self.ctx.clone(), inbox_rx, revoke_rx);
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            entity.run().await;
            if let Some(registry) = registry.upgrade() {
                registry.release(&dataset, generation);
            }
        });

        EntityHandle {
            generation,
            inbox: inbox_tx,
            revoke: revoke_tx,
        }
    }

    fn release(&self, dataset: &DatasetId, generation: u64) {
        if self
            .entities
            .remove_if(dataset, |_, handle| handle.generation == generation)
            .is_some()
        {
            tracing::debug!("Released entity {} (generation {})", dataset, generation);
        }
    }
}
