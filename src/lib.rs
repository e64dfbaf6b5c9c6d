//! policy-sync - Keeps an authorization policy snapshot in step across a cluster
//!
//! A [`sync::PolicySynchronizer`] polls a [`source::PolicySource`], reconciles
//! what it fetched with the locally applied [`snapshot::PolicySnapshot`] and,
//! through the [`cluster::DistributedCoordinator`], rolls significant changes
//! out to the other cluster members in two bounded phases.

pub mod cluster;
pub mod config;
pub mod conflict;
pub mod error;
pub mod snapshot;
pub mod source;
pub mod strategy;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{ClusterMembership, DistributedCoordinator, NodeTransport};
    pub use crate::config::Config;
    pub use crate::conflict::ResolutionPolicy;
    pub use crate::error::{Error, Result};
    pub use crate::snapshot::{Policy, PolicySnapshot};
    pub use crate::source::PolicySource;
    pub use crate::strategy::SyncStrategy;
    pub use crate::sync::{PolicySynchronizer, SyncDependencies, SyncTrigger};
}
