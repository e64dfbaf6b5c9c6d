//! Policy snapshot module
//!
//! Immutable policy snapshots as fetched from the policy source or produced
//! by a merge, the lock-free cell that holds the currently applied snapshot,
//! and the on-disk cache used to warm-start after a restart.

mod cell;
mod model;
mod store;

pub use cell::SnapshotCell;
pub use model::{Policy, PolicyDelta, PolicyEffect, PolicySnapshot, SourceMetadata};
pub use store::SnapshotStore;
