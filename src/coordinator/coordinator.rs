use super::aggregation::AggregationState;
use crate::correlation::table::{Correlations, PendingReplies};
use crate::correlation::types::{Reply, ReplyAddress, ReplyEnvelope};
use crate::dataset::types::{
    DatasetCommand, DatasetId, IndexSource, PartialOutcome, PartialResult, SearchResult,
};
use crate::error::CommandError;
use crate::membership::types::NodeId;
use crate::persistence::store::Persistence;
use crate::router::router::RequestRouter;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub search_timeout: Duration,
    pub single_search_timeout: Duration,
    pub index_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(60),
            single_search_timeout: Duration::from_secs(30),
            index_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub datasets: Vec<DatasetId>,
    pub query: String,
    pub top_k: usize,
    pub deadline: Instant,
}

impl SearchRequest {
    pub fn new(datasets: Vec<DatasetId>, query: impl Into<String>, top_k: usize, timeout: Duration) -> Self {
        Self {
            datasets,
            query: query.into(),
            top_k,
            deadline: Instant::now() + timeout,
        }
    }
}

/// Fans searches out to dataset entities and merges their answers.
///
/// Each request gets its own `AggregationState` and its own correlation
/// handle; nothing is shared between concurrent requests.
pub struct SearchCoordinator {
    local: NodeId,
    router: Arc<RequestRouter>,
    correlations: Arc<Correlations>,
    persistence: Arc<dyn Persistence>,
    settings: CoordinatorSettings,
}

impl SearchCoordinator {
    pub fn new(
        router: Arc<RequestRouter>,
        correlations: Arc<Correlations>,
        persistence: Arc<dyn Persistence>,
        settings: CoordinatorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            local: router.local_id().clone(),
            router,
            correlations,
            persistence,
            settings,
        })
    }

    pub fn settings(&self) -> CoordinatorSettings {
        self.settings
    }

    /// Always answers by the deadline, with whatever arrived until then.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, CommandError> {
        if request.top_k == 0 {
            return Err(CommandError::InvalidRequest("top_k must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        let datasets: Vec<DatasetId> = request
            .datasets
            .into_iter()
            .filter(|dataset| seen.insert(dataset.clone()))
            .collect();
        if datasets.is_empty() {
            return Err(CommandError::InvalidRequest("no datasets to search".to_string()));
        }

        let mut pending = self.correlations.open();
        let mut state = AggregationState::new(pending.request_id().clone(), datasets.clone());
        let mut redirects: HashMap<DatasetId, usize> = HashMap::new();
        let max_redirects = self.router.settings().max_redirects;

        tracing::debug!(
            "Request {} searching {} dataset(s) for {:?}",
            pending.request_id(),
            datasets.len(),
            request.query
        );

        for dataset in &datasets {
            self.dispatch_search(&pending, dataset.clone(), &request.query, request.top_k);
        }

        while !state.is_complete() {
            match pending.next_before(request.deadline).await {
                Some(Reply::Partial(partial)) => {
                    if let PartialOutcome::Rejected(CommandError::Moved { .. }) = &partial.outcome
                        && state.awaits(&partial.dataset)
                    {
                        let count = redirects.entry(partial.dataset.clone()).or_default();
                        if *count < max_redirects {
                            *count += 1;
                            tracing::debug!(
                                "Request {}: {} moved, re-routing ({}/{})",
                                pending.request_id(),
                                partial.dataset,
                                count,
                                max_redirects
                            );
                            self.dispatch_search(&pending, partial.dataset, &request.query, request.top_k);
                            continue;
                        }
                    }
                    state.record(partial);
                }
                Some(Reply::Indexed(outcome)) => {
                    tracing::debug!("Request {} ignoring index outcome for {}", pending.request_id(), outcome.dataset);
                }
                None => {
                    tracing::warn!(
                        "Request {} hit its deadline with {}/{} answer(s); missing {:?}",
                        pending.request_id(),
                        state.received_count(),
                        state.expected_count(),
                        state.outstanding()
                    );
                    break;
                }
            }
        }

        // Dropping `pending` unregisters the request; stragglers are discarded.
        Ok(state.finalize(request.top_k).unwrap_or_default())
    }

    /// Searches every dataset known to persistence.
    pub async fn search_all(
        &self,
        query: &str,
        top_k: usize,
        timeout: Duration,
    ) -> Result<Vec<SearchResult>, CommandError> {
        if top_k == 0 {
            return Err(CommandError::InvalidRequest("top_k must be positive".to_string()));
        }
        let datasets = self.list_datasets().await?;
        if datasets.is_empty() {
            return Ok(Vec::new());
        }
        self.search(SearchRequest::new(datasets, query, top_k, timeout)).await
    }

    pub async fn search_dataset(
        &self,
        dataset: DatasetId,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, CommandError> {
        self.search(SearchRequest::new(
            vec![dataset],
            query,
            top_k,
            self.settings.single_search_timeout,
        ))
        .await
    }

    /// Indexes and waits for the entity's outcome.
    pub async fn index_dataset(&self, dataset: DatasetId, source: IndexSource) -> Result<usize, CommandError> {
        self.index_dataset_within(dataset, source, self.settings.index_timeout)
            .await
    }

    pub async fn index_dataset_within(
        &self,
        dataset: DatasetId,
        source: IndexSource,
        timeout: Duration,
    ) -> Result<usize, CommandError> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.correlations.open();
        let max_redirects = self.router.settings().max_redirects;

        for attempt in 0..=max_redirects {
            self.router
                .route(DatasetCommand::Index {
                    dataset: dataset.clone(),
                    source: source.clone(),
                    reply_to: Some(self.reply_address(&pending)),
                })
                .await?;

            match Self::await_index(&mut pending, &dataset, deadline).await? {
                Err(e @ CommandError::Moved { .. }) if attempt < max_redirects => {
                    tracing::debug!("Index of {} bounced: {}, retrying", dataset, e);
                }
                result => return result,
            }
        }

        Err(CommandError::moved(&dataset, None))
    }

    /// Fire-and-forget index. Returns the node that accepted the command.
    pub async fn index_detached(&self, dataset: DatasetId, source: IndexSource) -> Result<NodeId, CommandError> {
        self.router
            .route(DatasetCommand::Index {
                dataset,
                source,
                reply_to: None,
            })
            .await
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetId>, CommandError> {
        self.persistence
            .list()
            .await
            .map_err(|e| CommandError::Persistence(e.to_string()))
    }

    async fn await_index(
        pending: &mut PendingReplies,
        dataset: &DatasetId,
        deadline: Instant,
    ) -> Result<Result<usize, CommandError>, CommandError> {
        loop {
            match pending.next_before(deadline).await {
                Some(Reply::Indexed(outcome)) if &outcome.dataset == dataset => return Ok(outcome.result),
                Some(_) => continue,
                None => return Err(CommandError::Timeout),
            }
        }
    }

    fn reply_address(&self, pending: &PendingReplies) -> ReplyAddress {
        ReplyAddress {
            node: self.local.clone(),
            request_id: pending.request_id().clone(),
        }
    }

    /// Routes in the background; a routing failure becomes that dataset's answer.
    fn dispatch_search(&self, pending: &PendingReplies, dataset: DatasetId, query: &str, top_k: usize) {
        let router = self.router.clone();
        let correlations = self.correlations.clone();
        let reply_to = self.reply_address(pending);
        let command = DatasetCommand::Search {
            dataset: dataset.clone(),
            query: query.to_string(),
            top_k,
            reply_to: reply_to.clone(),
        };

        tokio::spawn(async move {
            if let Err(e) = router.route(command).await {
                correlations.deliver(ReplyEnvelope {
                    request_id: reply_to.request_id,
                    reply: Reply::Partial(PartialResult {
                        dataset,
                        outcome: PartialOutcome::Rejected(e),
                    }),
                });
            }
        });
    }
}
