//! Single-consumer dataset entity.
//!
//! Each active dataset has exactly one task draining a bounded inbox. Commands
//! are handled one at a time, so the cached state needs no locking and commands
//! from one sender are observed in the order they were delivered.

use super::types::{
    DatasetCommand, DatasetId, DatasetState, IndexOutcome, IndexSource, PartialOutcome, PartialResult,
    SearchResult,
};
use crate::correlation::table::ReplySink;
use crate::correlation::types::{Reply, ReplyAddress};
use crate::error::CommandError;
use crate::membership::directory::MembershipDirectory;
use crate::membership::types::now_ms;
use crate::ownership::resolver::OwnershipResolver;
use crate::persistence::source::load_records;
use crate::persistence::store::Persistence;
use crate::scoring::scorer::Scorer;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy)]
pub struct EntitySettings {
    pub inbox_capacity: usize,
    /// An entity with no commands for this long unloads its cache and stops.
    pub idle_timeout: Duration,
    pub scorer_timeout: Duration,
    /// Serve searches from an already-loaded cache while the node is not
    /// authoritative (minority side of a partition).
    pub allow_stale_reads: bool,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            inbox_capacity: 64,
            idle_timeout: Duration::from_secs(120),
            scorer_timeout: Duration::from_secs(10),
            allow_stale_reads: false,
        }
    }
}

/// Collaborators shared by every entity on a node.
pub struct EntityContext {
    pub directory: Arc<MembershipDirectory>,
    pub resolver: Arc<OwnershipResolver>,
    pub persistence: Arc<dyn Persistence>,
    pub scorer: Arc<dyn Scorer>,
    pub replies: Arc<dyn ReplySink>,
    pub settings: EntitySettings,
}

impl EntityContext {
    /// Whether this node owns `dataset` under the current view.
    pub(crate) fn check_owner(&self, dataset: &DatasetId) -> Result<(), CommandError> {
        self.resolver.check_local(dataset, &self.directory.current_view())
    }

    /// Ownership decision for `command` under the current view.
    pub(crate) fn admit(&self, command: &DatasetCommand, has_cache: bool) -> Result<(), CommandError> {
        match self.check_owner(command.dataset()) {
            Ok(()) => Ok(()),
            Err(CommandError::NotAuthoritative)
                if command.is_read() && self.settings.allow_stale_reads && has_cache =>
            {
                tracing::debug!("Serving stale read for {}", command.dataset());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

enum Flow {
    Continue,
    /// Finish what is queued, then unload.
    Passivate,
    /// Stop and bounce everything still queued.
    Stop(CommandError),
}

pub(crate) struct DatasetEntity {
    id: DatasetId,
    generation: u64,
    ctx: Arc<EntityContext>,
    inbox: mpsc::Receiver<DatasetCommand>,
    revoke: watch::Receiver<Option<CommandError>>,
    cache: Option<DatasetState>,
    loaded: bool,
}

impl DatasetEntity {
    pub(crate) fn new(
        id: DatasetId,
        generation: u64,
        ctx: Arc<EntityContext>,
        inbox: mpsc::Receiver<DatasetCommand>,
        revoke: watch::Receiver<Option<CommandError>>,
    ) -> Self {
        Self {
            id,
            generation,
            ctx,
            inbox,
            revoke,
            cache: None,
            loaded: false,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!("Entity {} started (generation {})", self.id, self.generation);
        let idle_timeout = self.ctx.settings.idle_timeout;

        loop {
            tokio::select! {
                biased;

                changed = self.revoke.changed() => {
                    let reason = match changed {
                        Ok(()) => self.revoke.borrow_and_update().clone(),
                        Err(_) => Some(CommandError::ShuttingDown),
                    };
                    if let Some(reason) = reason {
                        tracing::info!("Entity {} revoked: {}", self.id, reason);
                        self.stop(reason).await;
                        return;
                    }
                }

                next = tokio::time::timeout(idle_timeout, self.inbox.recv()) => match next {
                    Ok(Some(command)) => match self.handle(command).await {
                        Flow::Continue => {}
                        Flow::Passivate => {
                            self.passivate().await;
                            return;
                        }
                        Flow::Stop(reason) => {
                            self.stop(reason).await;
                            return;
                        }
                    },
                    Ok(None) => {
                        self.unload();
                        return;
                    }
                    Err(_) => {
                        tracing::debug!("Entity {} idle for {:?}, passivating", self.id, idle_timeout);
                        self.passivate().await;
                        return;
                    }
                },
            }
        }
    }

    async fn handle(&mut self, command: DatasetCommand) -> Flow {
        if matches!(command, DatasetCommand::Evict { .. }) {
            return Flow::Passivate;
        }

        if let Err(reason) = self.ctx.admit(&command, self.cache.is_some()) {
            tracing::debug!("Entity {} rejecting {}: {}", self.id, command.kind(), reason);
            let moved = reason.is_moved();
            self.reject(command, reason.clone()).await;
            return if moved { Flow::Stop(reason) } else { Flow::Continue };
        }

        match command {
            DatasetCommand::Index { source, reply_to, .. } => {
                if let Err(reason) = self.index(source, reply_to).await
                    && reason.is_moved()
                {
                    return Flow::Stop(reason);
                }
            }
            DatasetCommand::Search {
                query,
                top_k,
                reply_to,
                ..
            } => self.search(&query, top_k, reply_to).await,
            DatasetCommand::Evict { .. } => return Flow::Passivate,
        }
        Flow::Continue
    }

    async fn index(
        &mut self,
        source: IndexSource,
        reply_to: Option<ReplyAddress>,
    ) -> Result<usize, CommandError> {
        let result = self.rebuild(&source).await;
        match &result {
            Ok(count) => tracing::info!("Indexed {} record(s) into {}", count, self.id),
            Err(e) => tracing::warn!("Index of {} failed: {}", self.id, e),
        }

        if let Some(reply_to) = reply_to {
            let outcome = IndexOutcome {
                dataset: self.id.clone(),
                result: result.clone(),
            };
            self.ctx.replies.reply(reply_to, Reply::Indexed(outcome)).await;
        }
        result
    }

    /// Replaces the cache only after the new state is durable. Ownership is
    /// re-checked once the records are read; a node that lost the dataset in
    /// the meantime never saves.
    pub(super) async fn rebuild(&mut self, source: &IndexSource) -> Result<usize, CommandError> {
        let records = load_records(source).await?;
        self.ctx.check_owner(&self.id)?;
        let state = DatasetState {
            dataset: self.id.clone(),
            records,
            source: match source {
                IndexSource::Path(path) => Some(path.display().to_string()),
                IndexSource::Records(_) => None,
            },
            indexed_at: now_ms(),
        };

        if let Err(e) = self.ctx.persistence.save(&state).await {
            tracing::error!("Failed to persist dataset {}: {:?}", self.id, e);
            return Err(CommandError::Persistence(e.to_string()));
        }

        let count = state.records.len();
        self.cache = Some(state);
        self.loaded = true;
        Ok(count)
    }

    async fn search(&mut self, query: &str, top_k: usize, reply_to: ReplyAddress) {
        self.ensure_loaded().await;

        let outcome = match &self.cache {
            None => PartialOutcome::NoData,
            Some(state) => PartialOutcome::Results(self.rank(state, query, top_k).await),
        };

        let partial = PartialResult {
            dataset: self.id.clone(),
            outcome,
        };
        self.ctx.replies.reply(reply_to, Reply::Partial(partial)).await;
    }

    /// Scorer failures and timeouts yield an empty list, never an error.
    async fn rank(&self, state: &DatasetState, query: &str, top_k: usize) -> Vec<SearchResult> {
        if state.records.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let ranked = tokio::time::timeout(
            self.ctx.settings.scorer_timeout,
            self.ctx.scorer.rank(query, &state.records, top_k),
        )
        .await;

        match ranked {
            Ok(Ok(scored)) => scored
                .into_iter()
                .filter(|s| s.score.is_finite())
                .take(top_k)
                .map(|s| SearchResult {
                    content: s.text,
                    score: s.score,
                    dataset: self.id.clone(),
                })
                .collect(),
            Ok(Err(e)) => {
                tracing::warn!("Scorer failed for {}: {:?}", self.id, e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    "Scorer timed out for {} after {:?}",
                    self.id,
                    self.ctx.settings.scorer_timeout
                );
                Vec::new()
            }
        }
    }

    /// Lazily pulls persisted state the first time a search needs it.
    async fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        match self.ctx.persistence.load(&self.id).await {
            Ok(Some(state)) => {
                tracing::debug!("Loaded {} record(s) for {}", state.records.len(), self.id);
                self.cache = Some(state);
            }
            Ok(None) => tracing::debug!("No persisted state for {}", self.id),
            Err(e) => tracing::error!("Failed to load dataset {}: {:?}", self.id, e),
        }
    }

    async fn reject(&self, command: DatasetCommand, reason: CommandError) {
        match command {
            DatasetCommand::Search { reply_to, .. } => {
                let partial = PartialResult {
                    dataset: self.id.clone(),
                    outcome: PartialOutcome::Rejected(reason),
                };
                self.ctx.replies.reply(reply_to, Reply::Partial(partial)).await;
            }
            DatasetCommand::Index {
                reply_to: Some(reply_to),
                ..
            } => {
                let outcome = IndexOutcome {
                    dataset: self.id.clone(),
                    result: Err(reason),
                };
                self.ctx.replies.reply(reply_to, Reply::Indexed(outcome)).await;
            }
            DatasetCommand::Index { reply_to: None, .. } | DatasetCommand::Evict { .. } => {}
        }
    }

    async fn passivate(&mut self) {
        self.inbox.close();
        while let Some(command) = self.inbox.recv().await {
            if let Flow::Stop(reason) = self.handle(command).await {
                self.stop(reason).await;
                return;
            }
        }
        self.unload();
    }

    async fn stop(&mut self, reason: CommandError) {
        self.inbox.close();
        while let Some(command) = self.inbox.recv().await {
            if !matches!(command, DatasetCommand::Evict { .. }) {
                self.reject(command, reason.clone()).await;
            }
        }
        self.unload();
    }

    fn unload(&mut self) {
        self.cache = None;
        self.loaded = false;
        tracing::debug!("Entity {} unloaded (generation {})", self.id, self.generation);
    }
}
