//! Distributed Dataset Search Cluster Library
//!
//! Datasets are owned by exactly one node at a time and searched across the
//! cluster. The binary (`main.rs`) only parses configuration and serves HTTP;
//! everything else lives here.
//!
//! ## Architecture Modules
//!
//! - **`membership`**: UDP gossip (SWIM-like), failure detection, partition
//!   strategies and versioned membership views.
//! - **`ownership`**: Consistent-hash mapping of datasets to live nodes.
//! - **`dataset`**: Per-dataset single-consumer entities and their registry.
//! - **`router`**: Location-transparent command delivery and node transports.
//! - **`correlation`**: Request ids, pending-reply table and reply envelopes.
//! - **`coordinator`**: Multi-dataset search fan-out, aggregation and ranking.
//! - **`scoring`** / **`persistence`**: External collaborators behind traits.
//! - **`cluster`** / **`config`**: Node wiring and bootstrap parameters.

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod correlation;
pub mod dataset;
pub mod error;
pub mod membership;
pub mod ownership;
pub mod persistence;
pub mod router;
pub mod scoring;

#[cfg(test)]
pub(crate) mod testing;
