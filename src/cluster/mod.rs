//! Cluster-wide rollout of policy snapshots
//!
//! A leader is elected from the membership view, takes the cluster's single
//! coordination token, validates every target node, and pushes the snapshot
//! in two threshold-gated phases. Followers that share the leader's ledger
//! wait for its round to publish a new version; the rest update on their own.

mod coordination;
mod coordinator;
mod membership;
mod node_state;
mod rollout;
mod transport;

pub use coordination::{CoordinationLedger, InMemoryLedger, RoundToken};
pub use coordinator::{CoordinationResult, DistributedCoordinator};
pub use membership::{ClusterMember, ClusterMembership, StaticMembership};
pub use node_state::{ClusterHealth, ClusterSyncView, NodeSyncState, NodeSyncStatus};
pub use rollout::{plan_rollout, RolloutPlan, PHASE_ONE_SUCCESS_THRESHOLD};
pub use transport::{LoopbackTransport, NodeTransport};
