//! Ownership Module
//!
//! Deterministic dataset-to-node placement. `OwnershipResolver` hashes dataset ids onto a
//! consistent ring built from the live members of a `MembershipView`; membership changes
//! only move the datasets of the nodes that joined or left.

pub mod resolver;
