//! Two-phase snapshot rollout
//!
//! Phase 1 updates at most `max_concurrent_nodes` nodes (and never more than
//! half the cluster). Phase 2 only runs once at least 80% of phase 1 took the
//! new snapshot, which bounds how far a bad snapshot can spread.

use super::transport::NodeTransport;
use crate::snapshot::PolicySnapshot;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Percentage of phase 1 that must succeed before phase 2 starts
pub const PHASE_ONE_SUCCESS_THRESHOLD: usize = 80;

/// Target nodes split into the two rollout phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutPlan {
    pub phase_one: Vec<String>,
    pub phase_two: Vec<String>,
}

impl RolloutPlan {
    pub fn total_nodes(&self) -> usize {
        self.phase_one.len() + self.phase_two.len()
    }

    /// Whether `successes` out of phase 1 clears the threshold
    pub fn phase_one_passed(&self, successes: usize) -> bool {
        successes * 100 >= self.phase_one.len() * PHASE_ONE_SUCCESS_THRESHOLD
    }
}

/// Split `targets` into phases. Phase 1 holds
/// `max(1, min(max_concurrent, ceil(n / 2)))` nodes.
pub fn plan_rollout(mut targets: Vec<String>, max_concurrent: usize) -> RolloutPlan {
    targets.sort();
    targets.dedup();

    let half = targets.len().div_ceil(2);
    let phase_one_size = max_concurrent.min(half).max(1).min(targets.len());
    let phase_two = targets.split_off(phase_one_size);

    RolloutPlan {
        phase_one: targets,
        phase_two,
    }
}

/// Outcome of pushing a snapshot to one node
#[derive(Debug, Clone)]
pub(crate) struct NodeUpdate {
    pub node_id: String,
    pub error: Option<String>,
    pub duration: Duration,
}

impl NodeUpdate {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Push `snapshot` to every node in `nodes`, at most `concurrency` at a time,
/// and wait for all of them
pub(crate) async fn run_phase(
    nodes: &[String],
    concurrency: usize,
    transport: &Arc<dyn NodeTransport>,
    snapshot: &Arc<PolicySnapshot>,
    node_timeout: Duration,
) -> Vec<NodeUpdate> {
    stream::iter(nodes.iter().cloned())
        .map(|node_id| {
            let transport = Arc::clone(transport);
            let snapshot = Arc::clone(snapshot);
            async move {
                let started = Instant::now();
                let error = match tokio::time::timeout(
                    node_timeout,
                    transport.push_snapshot(&node_id, snapshot),
                )
                .await
                {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("update timed out after {:?}", node_timeout)),
                };
                NodeUpdate {
                    node_id,
                    error,
                    duration: started.elapsed(),
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}
