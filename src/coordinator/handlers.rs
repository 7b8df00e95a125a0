use super::coordinator::{SearchCoordinator, SearchRequest};
use crate::dataset::types::{DatasetId, IndexSource, SearchResult};
use crate::error::CommandError;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const ENDPOINT_INDEX_DATASET: &str = "/api/datasets/:id/index";
pub const ENDPOINT_SEARCH: &str = "/api/search";
pub const ENDPOINT_LIST_DATASETS: &str = "/api/datasets";

const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexRequest {
    /// File to read records from. Ignored when `records` is given.
    pub path: Option<PathBuf>,
    pub records: Option<Vec<String>>,
    /// Return as soon as the owner accepted the command.
    #[serde(default)]
    pub detached: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    pub dataset: DatasetId,
    pub accepted: bool,
    pub records: Option<usize>,
    pub error: Option<CommandError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchApiRequest {
    /// Searches every persisted dataset when absent or empty.
    #[serde(default)]
    pub datasets: Vec<String>,
    pub query: String,
    pub top_k: Option<usize>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchApiResponse {
    pub results: Vec<SearchResult>,
    pub error: Option<CommandError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListDatasetsResponse {
    pub datasets: Vec<DatasetId>,
}

fn status_for(error: &CommandError) -> StatusCode {
    match error {
        CommandError::InvalidRequest(_) | CommandError::Source(_) => StatusCode::BAD_REQUEST,
        CommandError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        CommandError::NotAuthoritative
        | CommandError::Unavailable(_)
        | CommandError::Moved { .. }
        | CommandError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        CommandError::Persistence(_) | CommandError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn handle_index_dataset(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(id): Path<String>,
    Json(req): Json<IndexRequest>,
) -> (StatusCode, Json<IndexResponse>) {
    let dataset = DatasetId::new(id);

    let source = match (req.records, req.path) {
        (Some(records), _) => IndexSource::Records(records),
        (None, Some(path)) => IndexSource::Path(path),
        (None, None) => {
            let error = CommandError::InvalidRequest("either path or records is required".to_string());
            return (
                status_for(&error),
                Json(IndexResponse {
                    dataset,
                    accepted: false,
                    records: None,
                    error: Some(error),
                }),
            );
        }
    };

    if req.detached {
        return match coordinator.index_detached(dataset.clone(), source).await {
            Ok(owner) => {
                tracing::info!("Index of {} accepted by {}", dataset, owner);
                (
                    StatusCode::ACCEPTED,
                    Json(IndexResponse {
                        dataset,
                        accepted: true,
                        records: None,
                        error: None,
                    }),
                )
            }
            Err(e) => (
                status_for(&e),
                Json(IndexResponse {
                    dataset,
                    accepted: false,
                    records: None,
                    error: Some(e),
                }),
            ),
        };
    }

    match coordinator.index_dataset(dataset.clone(), source).await {
        Ok(count) => (
            StatusCode::OK,
            Json(IndexResponse {
                dataset,
                accepted: true,
                records: Some(count),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to index {}: {}", dataset, e);
            (
                status_for(&e),
                Json(IndexResponse {
                    dataset,
                    accepted: false,
                    records: None,
                    error: Some(e),
                }),
            )
        }
    }
}

pub async fn handle_search(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Json(req): Json<SearchApiRequest>,
) -> (StatusCode, Json<SearchApiResponse>) {
    let top_k = req.top_k.unwrap_or(DEFAULT_TOP_K);
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(coordinator.settings().search_timeout);

    let result = if req.datasets.is_empty() {
        coordinator.search_all(&req.query, top_k, timeout).await
    } else {
        let datasets = req.datasets.into_iter().map(DatasetId::from).collect();
        coordinator
            .search(SearchRequest::new(datasets, req.query, top_k, timeout))
            .await
    };

    match result {
        Ok(results) => (
            StatusCode::OK,
            Json(SearchApiResponse {
                results,
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(SearchApiResponse {
                results: Vec::new(),
                error: Some(e),
            }),
        ),
    }
}

pub async fn handle_list_datasets(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
) -> (StatusCode, Json<ListDatasetsResponse>) {
    match coordinator.list_datasets().await {
        Ok(datasets) => (StatusCode::OK, Json(ListDatasetsResponse { datasets })),
        Err(e) => {
            tracing::error!("Failed to list datasets: {}", e);
            (
                status_for(&e),
                Json(ListDatasetsResponse {
                    datasets: Vec::new(),
                }),
            )
        }
    }
}
