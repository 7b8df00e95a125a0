use crate::correlation::types::RequestId;
use crate::dataset::types::{DatasetId, PartialOutcome, PartialResult, SearchResult};

use std::collections::HashMap;

/// Collects the partial answers of one fan-out search.
///
/// Owned by the coordinator task running the request, so updates are
/// serialized without locks. Finalization happens at most once.
#[derive(Debug)]
pub struct AggregationState {
    request_id: RequestId,
    order: Vec<DatasetId>,
    received: HashMap<DatasetId, PartialOutcome>,
    finalized: bool,
}

impl AggregationState {
    /// `order` must already be free of duplicates.
    pub fn new(request_id: RequestId, order: Vec<DatasetId>) -> Self {
        Self {
            request_id,
            order,
            received: HashMap::new(),
            finalized: false,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn expected_count(&self) -> usize {
        self.order.len()
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.order.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Still waiting for an answer from `dataset`.
    pub fn awaits(&self, dataset: &DatasetId) -> bool {
        !self.finalized && self.order.contains(dataset) && !self.received.contains_key(dataset)
    }

    pub fn outstanding(&self) -> Vec<DatasetId> {
        self.order
            .iter()
            .filter(|dataset| !self.received.contains_key(*dataset))
            .cloned()
            .collect()
    }

    /// Records one dataset's answer. Unknown datasets, duplicates and anything
    /// arriving after finalization are ignored.
    pub fn record(&mut self, partial: PartialResult) -> bool {
        if !self.awaits(&partial.dataset) {
            tracing::debug!(
                "Request {} ignoring answer from {}",
                self.request_id,
                partial.dataset
            );
            return false;
        }

        if let PartialOutcome::Rejected(e) = &partial.outcome {
            tracing::warn!(
                "Request {}: dataset {} answered with {}, counting as no data",
                self.request_id,
                partial.dataset,
                e
            );
        }

        self.received.insert(partial.dataset, partial.outcome);
        true
    }

    /// Ranks everything collected so far: score descending, ties kept in
    /// dataset order then original position. Returns `None` when called twice.
    pub fn finalize(&mut self, top_k: usize) -> Option<Vec<SearchResult>> {
        if self.finalized {
            return None;
        }
        self.finalized = true;

        let mut results: Vec<SearchResult> = self
            .order
            .iter()
            .filter_map(|dataset| self.received.get(dataset))
            .flat_map(|outcome| outcome.results().iter().cloned())
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);

        tracing::debug!(
            "Request {} finalized with {}/{} answer(s), {} result(s)",
            self.request_id,
            self.received.len(),
            self.order.len(),
            results.len()
        );
        Some(results)
    }
}
