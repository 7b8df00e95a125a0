//! Dataset Module
//!
//! A dataset entity is the sole owner of one dataset's cached state on the
//! node that owns the dataset. It processes `Index`, `Search` and `Evict`
//! commands sequentially from a bounded inbox and:
//!
//! 1. **Loads lazily**: persisted state is read on the first search that needs it.
//! 2. **Writes through**: a new index replaces the cache only after it was saved.
//! 3. **Degrades on scorer trouble**: scorer errors and timeouts produce empty results.
//! 4. **Steps down**: when the membership view moves the dataset elsewhere the
//!    entity is revoked and queued commands are bounced back to the router.
//!
//! The `EntityRegistry` creates entities on demand and guarantees at most one
//! per dataset per node.

pub mod entity;
pub mod registry;
pub mod types;
