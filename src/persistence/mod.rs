//! Persistence Module
//!
//! Durable dataset state lives outside the entities so that it survives
//! entity restarts and ownership moves. `FileStore` keeps one JSON document
//! per dataset; `MemoryStore` is the in-process variant used by tests and
//! single-process clusters.

pub mod source;
pub mod store;

#[cfg(test)]
mod tests;
