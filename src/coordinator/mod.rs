//! Search Coordinator Module
//!
//! Entry point for callers. A search over several datasets:
//!
//! 1. Opens a correlation handle and an `AggregationState` for the request.
//! 2. Routes one search command per dataset, replies addressed to the handle.
//! 3. Records partial answers until all arrived or the deadline passed.
//! 4. Ranks the collected results by score and truncates them to `top_k`.
//!
//! Late answers are discarded; a search never waits past its deadline.

pub mod aggregation;
pub mod coordinator;
pub mod handlers;
