//! Membership & Discovery Module
//!
//! Tracks which nodes are reachable, detects partitions and decides whether
//! this node's side of a partition is authoritative.
//!
//! ## Core Mechanisms
//! - **Directory**: `MembershipDirectory` owns the member table and publishes versioned
//!   `MembershipView`s (`current_view`, `watch`, `subscribe`). It performs no I/O, which keeps
//!   the partition logic testable.
//! - **Gossip Protocol**: `MembershipService` exchanges bincode-encoded messages over UDP and
//!   feeds the directory (SWIM-like ping/ack, join, suspect/alive refutation, leave).
//! - **Failure Detection**: `Alive -> Suspect -> Dead` with a stability window so a slow node
//!   does not flap in and out of the ownership ring.
//! - **Split-brain Resolution**: a pluggable `PartitionStrategy` (majority or keep-oldest)
//!   decides which side keeps handing out ownership; the authoritative side downs the rest.

pub mod directory;
pub mod handlers;
pub mod service;
pub mod strategy;
pub mod types;

#[cfg(test)]
mod tests;
