use crate::correlation::types::ReplyAddress;
use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Caller-supplied key of a dataset, unique across the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(pub String);

impl DatasetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DatasetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Cached contents of one dataset: the candidate records the scorer ranks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetState {
    pub dataset: DatasetId,
    pub records: Vec<String>,
    /// Where the records came from, if they were read from a file.
    pub source: Option<String>,
    /// Timestamp (ms) of the index that produced this state.
    pub indexed_at: u64,
}

/// One ranked record. Produced by the scorer, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub content: String,
    /// Higher is better.
    pub score: f32,
    pub dataset: DatasetId,
}

/// What an `Index` command reads its records from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IndexSource {
    /// Plain text (one record per non-empty line) or a `.json` array of strings.
    Path(PathBuf),
    Records(Vec<String>),
}

/// Commands addressed to a single dataset entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DatasetCommand {
    Index {
        dataset: DatasetId,
        source: IndexSource,
        reply_to: Option<ReplyAddress>,
    },
    Search {
        dataset: DatasetId,
        query: String,
        top_k: usize,
        reply_to: ReplyAddress,
    },
    Evict {
        dataset: DatasetId,
    },
}

impl DatasetCommand {
    pub fn dataset(&self) -> &DatasetId {
        match self {
            DatasetCommand::Index { dataset, .. }
            | DatasetCommand::Search { dataset, .. }
            | DatasetCommand::Evict { dataset } => dataset,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DatasetCommand::Index { .. } => "index",
            DatasetCommand::Search { .. } => "search",
            DatasetCommand::Evict { .. } => "evict",
        }
    }

    /// Searches may be served from a stale cache when explicitly allowed.
    pub fn is_read(&self) -> bool {
        matches!(self, DatasetCommand::Search { .. })
    }
}

/// One dataset's answer to a search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartialResult {
    pub dataset: DatasetId,
    pub outcome: PartialOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PartialOutcome {
    Results(Vec<SearchResult>),
    /// The dataset was never indexed or its persisted data is gone.
    NoData,
    Rejected(CommandError),
}

impl PartialOutcome {
    pub fn results(&self) -> &[SearchResult] {
        match self {
            PartialOutcome::Results(results) => results,
            PartialOutcome::NoData | PartialOutcome::Rejected(_) => &[],
        }
    }
}

/// Answer to an `Index` command carrying a reply address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexOutcome {
    pub dataset: DatasetId,
    /// Number of records now cached, or why the index was refused.
    pub result: Result<usize, CommandError>,
}
