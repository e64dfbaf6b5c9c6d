use super::coordination::{CoordinationLedger, RoundToken};
use super::membership::{ClusterMember, ClusterMembership};
use super::node_state::{ClusterSyncView, NodeSyncState, NodeSyncStatus};
use super::rollout::{plan_rollout, run_phase, NodeUpdate, RolloutPlan};
use super::transport::NodeTransport;
use crate::config::DistributedConfig;
use crate::error::{Error, Result};
use crate::snapshot::PolicySnapshot;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of one coordination round, as seen from the local node
#[derive(Debug, Clone, Serialize)]
pub struct CoordinationResult {
    pub successful: bool,
    pub leader_id: Option<String>,
    pub local_is_leader: bool,
    /// Nodes that took the snapshot during this round
    pub nodes_updated: usize,
    /// Nodes targeted by the rollout
    pub total_nodes: usize,
    pub failed_nodes: Vec<String>,
    pub reason: String,
    pub duration_ms: u64,
}

impl CoordinationResult {
    fn new(leader_id: Option<String>, local_is_leader: bool, started: Instant) -> Self {
        CoordinationResult {
            successful: false,
            leader_id,
            local_is_leader,
            nodes_updated: 0,
            total_nodes: 0,
            failed_nodes: Vec::new(),
            reason: String::new(),
            duration_ms: 0,
        }
        .finished(started)
    }

    fn finished(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }

    fn succeed(mut self, reason: impl Into<String>, started: Instant) -> Self {
        self.successful = true;
        self.reason = reason.into();
        self.finished(started)
    }

    fn fail(mut self, reason: impl Into<String>, started: Instant) -> Self {
        self.successful = false;
        self.reason = reason.into();
        self.finished(started)
    }
}

/// Elects the rollout leader and runs coordination rounds.
///
/// Per-node sync state lives here and is only written from inside a round,
/// or when the local node reports a successful attempt. Local failures are
/// never recorded: peers cannot see them, and electing from a view only one
/// node holds splits the cluster.
pub struct DistributedCoordinator {
    config: DistributedConfig,
    membership: Arc<dyn ClusterMembership>,
    transport: Arc<dyn NodeTransport>,
    ledger: Arc<dyn CoordinationLedger>,
    node_states: DashMap<String, NodeSyncState>,
}

impl DistributedCoordinator {
    pub fn new(
        config: DistributedConfig,
        membership: Arc<dyn ClusterMembership>,
        transport: Arc<dyn NodeTransport>,
        ledger: Arc<dyn CoordinationLedger>,
    ) -> Self {
        DistributedCoordinator {
            config,
            membership,
            transport,
            ledger,
            node_states: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn local_node_id(&self) -> String {
        self.membership.local_node_id()
    }

    /// Pick the leader: the designated master if healthy, otherwise the
    /// lowest-id healthy data node
    pub fn elect_leader(&self) -> Option<String> {
        let members = self.membership.members();

        if let Some(master) = self.membership.master_node_id() {
            if let Some(member) = members.iter().find(|m| m.id == master) {
                if self.member_is_healthy(member) {
                    return Some(master);
                }
                debug!("Master {} is unhealthy, falling back to data nodes", master);
            }
        }

        let healthy = members
            .iter()
            .filter(|m| m.data_node && self.member_is_healthy(m))
            .map(|m| m.id.clone())
            .min();

        // with nobody healthy, any reachable data node can lead the recovery
        healthy.or_else(|| {
            members
                .iter()
                .filter(|m| m.data_node && m.reachable)
                .map(|m| m.id.clone())
                .min()
        })
    }

    pub fn is_local_leader(&self) -> bool {
        self.elect_leader().as_deref() == Some(self.local_node_id().as_str())
    }

    /// Followers wait on the leader's round only when the ledger is shared
    pub fn followers_wait(&self) -> bool {
        self.ledger.is_shared()
    }

    /// Members without a record are presumed healthy; only a rollout leader
    /// learns about its peers
    fn member_is_healthy(&self, member: &ClusterMember) -> bool {
        if !member.reachable {
            return false;
        }
        match self.node_states.get(&member.id) {
            Some(state) => state.is_healthy(Utc::now()),
            None => true,
        }
    }

    /// Data nodes, other than the local one, that a rollout should reach
    fn rollout_targets(&self) -> Vec<String> {
        let local = self.local_node_id();
        self.membership
            .members()
            .into_iter()
            .filter(|m| m.data_node && m.reachable && m.id != local)
            .filter(|m| {
                !matches!(
                    self.node_states.get(&m.id).map(|s| s.status),
                    Some(NodeSyncStatus::Excluded) | Some(NodeSyncStatus::Offline)
                )
            })
            .map(|m| m.id)
            .collect()
    }

    /// Take part in cluster coordination for `snapshot`.
    ///
    /// The leader runs a full round; a follower waits until the leader has
    /// published a version other than `local_version`.
    pub async fn coordinate(
        &self,
        snapshot: Arc<PolicySnapshot>,
        local_version: Option<&str>,
        request_id: &str,
    ) -> CoordinationResult {
        let started = Instant::now();

        if !self.config.enabled {
            return CoordinationResult::new(Some(self.local_node_id()), true, started)
                .succeed("Distributed sync disabled, single-node update", started);
        }

        let leader = self.elect_leader();
        let local = self.local_node_id();
        if leader.as_deref() == Some(local.as_str()) {
            self.lead_round(snapshot, request_id, leader, started).await
        } else if self.ledger.is_shared() {
            self.follow_round(local_version, leader, started).await
        } else {
            let reason = format!(
                "No shared ledger with leader {}, updating locally",
                leader.as_deref().unwrap_or("none")
            );
            CoordinationResult::new(leader, false, started).succeed(reason, started)
        }
    }

    /// Run a leader round on `snapshot` right away. Fails when the local node
    /// is not the leader.
    pub async fn force_rollout(
        &self,
        snapshot: Arc<PolicySnapshot>,
        request_id: &str,
    ) -> CoordinationResult {
        let started = Instant::now();
        let leader = self.elect_leader();
        let local = self.local_node_id();

        if !self.config.enabled {
            return CoordinationResult::new(leader, false, started)
                .fail("Distributed sync is disabled", started);
        }
        if leader.as_deref() != Some(local.as_str()) {
            let reason = format!(
                "Local node {} is not the cluster leader (leader: {})",
                local,
                leader.as_deref().unwrap_or("none")
            );
            return CoordinationResult::new(leader, false, started).fail(reason, started);
        }

        self.lead_round(snapshot, request_id, leader, started).await
    }

    async fn lead_round(
        &self,
        snapshot: Arc<PolicySnapshot>,
        request_id: &str,
        leader: Option<String>,
        started: Instant,
    ) -> CoordinationResult {
        let result = CoordinationResult::new(leader, true, started);
        let local = self.local_node_id();

        let token = match self.acquire_token(&local, request_id).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Could not start coordination round {}: {}", request_id, e);
                return result.fail(e.to_string(), started);
            }
        };

        info!(
            "Leading coordination round {} for version {}",
            request_id, snapshot.version
        );
        let result = self.run_round(&snapshot, result, started).await;

        if let Err(e) = self.ledger.release(&token).await {
            error!("Failed to release coordination token {}: {}", token.id, e);
        }

        if result.successful {
            info!(
                "Coordination round {} complete: {}/{} nodes updated in {}ms",
                request_id, result.nodes_updated, result.total_nodes, result.duration_ms
            );
        } else {
            warn!("Coordination round {} failed: {}", request_id, result.reason);
        }
        result
    }

    async fn acquire_token(&self, holder: &str, request_id: &str) -> Result<RoundToken> {
        let deadline = Instant::now() + Duration::from_millis(self.config.leader_timeout_ms);
        let poll = Duration::from_millis(self.config.follower_poll_interval_ms.max(1));

        loop {
            if let Some(token) = self.ledger.try_acquire(holder, request_id).await? {
                return Ok(token);
            }
            if Instant::now() + poll > deadline {
                return Err(Error::Coordination(format!(
                    "Timed out after {}ms waiting for the coordination token",
                    self.config.leader_timeout_ms
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn run_round(
        &self,
        snapshot: &Arc<PolicySnapshot>,
        mut result: CoordinationResult,
        started: Instant,
    ) -> CoordinationResult {
        let plan = plan_rollout(self.rollout_targets(), self.config.max_concurrent_nodes);
        result.total_nodes = plan.total_nodes();

        if let Err(e) = self.validate_targets(&plan, snapshot).await {
            return result.fail(e.to_string(), started);
        }

        // phase 1
        let phase_one = self.run_tracked_phase(&plan.phase_one, snapshot, plan.phase_one.len()).await;
        let phase_one_ok = phase_one.iter().filter(|u| u.succeeded()).count();
        result.nodes_updated = phase_one_ok;
        result
            .failed_nodes
            .extend(phase_one.iter().filter(|u| !u.succeeded()).map(|u| u.node_id.clone()));

        if !plan.phase_one_passed(phase_one_ok) {
            let reason = format!(
                "Phase 1 updated only {}/{} nodes, rollout stopped",
                phase_one_ok,
                plan.phase_one.len()
            );
            return result.fail(reason, started);
        }

        // phase 2
        if !plan.phase_two.is_empty() {
            let phase_two = self
                .run_tracked_phase(&plan.phase_two, snapshot, plan.phase_two.len())
                .await;
            result.nodes_updated += phase_two.iter().filter(|u| u.succeeded()).count();
            result
                .failed_nodes
                .extend(phase_two.iter().filter(|u| !u.succeeded()).map(|u| u.node_id.clone()));
        }

        if let Err(e) = self.ledger.publish_version(&snapshot.version).await {
            return result.fail(format!("Failed to publish version: {}", e), started);
        }

        let reason = format!(
            "Rolled out {} to {}/{} nodes",
            snapshot.version, result.nodes_updated, result.total_nodes
        );
        result.succeed(reason, started)
    }

    async fn validate_targets(&self, plan: &RolloutPlan, snapshot: &Arc<PolicySnapshot>) -> Result<()> {
        let targets: Vec<&String> = plan.phase_one.iter().chain(plan.phase_two.iter()).collect();
        let checks = join_all(targets.iter().map(|node_id| {
            let transport = Arc::clone(&self.transport);
            async move {
                let outcome = transport.check_compatibility(node_id, snapshot).await;
                (node_id.to_string(), outcome)
            }
        }))
        .await;

        let mut incompatible = Vec::new();
        for (node_id, outcome) in checks {
            if let Err(e) = outcome {
                warn!("Node {} rejected snapshot {}: {}", node_id, snapshot.version, e);
                self.record(&node_id, None, NodeSyncStatus::Conflict, Some(e.to_string()), None);
                incompatible.push(node_id);
            }
        }

        if incompatible.is_empty() {
            Ok(())
        } else {
            Err(Error::Coordination(format!(
                "Validation failed for nodes: {}",
                incompatible.join(", ")
            )))
        }
    }

    async fn run_tracked_phase(
        &self,
        nodes: &[String],
        snapshot: &Arc<PolicySnapshot>,
        concurrency: usize,
    ) -> Vec<NodeUpdate> {
        for node_id in nodes {
            self.record(node_id, None, NodeSyncStatus::Syncing, None, None);
        }

        let timeout = Duration::from_millis(self.config.node_update_timeout_ms);
        let updates = run_phase(nodes, concurrency, &self.transport, snapshot, timeout).await;

        for update in &updates {
            match &update.error {
                None => self.record(
                    &update.node_id,
                    Some(snapshot.version.clone()),
                    NodeSyncStatus::Synchronized,
                    None,
                    Some(update.duration),
                ),
                Some(e) => {
                    warn!("Update of node {} failed: {}", update.node_id, e);
                    self.record(
                        &update.node_id,
                        None,
                        NodeSyncStatus::Failed,
                        Some(e.clone()),
                        Some(update.duration),
                    )
                }
            }
        }
        updates
    }

    async fn follow_round(
        &self,
        local_version: Option<&str>,
        leader: Option<String>,
        started: Instant,
    ) -> CoordinationResult {
        let result = CoordinationResult::new(leader, false, started);
        let timeout = Duration::from_millis(self.config.coordination_timeout_ms);
        let poll = Duration::from_millis(self.config.follower_poll_interval_ms.max(1));

        debug!(
            "Waiting up to {:?} for leader {} to coordinate",
            timeout,
            result.leader_id.as_deref().unwrap_or("none")
        );

        let deadline = Instant::now() + timeout;
        loop {
            match self.ledger.published_version().await {
                Ok(Some(published)) if Some(published.as_str()) != local_version => {
                    let reason = format!("Leader published version {}", published);
                    return result.succeed(reason, started);
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to read coordination state: {}", e),
            }

            if Instant::now() >= deadline {
                return result.fail("Timeout waiting for leader coordination", started);
            }
            tokio::time::sleep(poll.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    fn record(
        &self,
        node_id: &str,
        version: Option<String>,
        status: NodeSyncStatus,
        error: Option<String>,
        duration: Option<Duration>,
    ) {
        let mut entry = self
            .node_states
            .entry(node_id.to_string())
            .or_insert_with(|| NodeSyncState::new(node_id));
        let updated = entry.with_update(version, status, error, duration);
        *entry = updated;
    }

    /// Record a successful local attempt, holding `version` if one is known
    pub fn record_local_sync(&self, version: Option<&str>, duration: Duration) {
        let local = self.local_node_id();
        self.record(
            &local,
            version.map(str::to_string),
            NodeSyncStatus::Synchronized,
            None,
            Some(duration),
        );
    }

    /// Take a node out of (or back into) rollouts
    pub fn set_excluded(&self, node_id: &str, excluded: bool) {
        let status = if excluded {
            NodeSyncStatus::Excluded
        } else {
            NodeSyncStatus::Pending
        };
        self.record(node_id, None, status, None, None);
    }

    pub fn node_state(&self, node_id: &str) -> Option<NodeSyncState> {
        self.node_states.get(node_id).map(|s| s.value().clone())
    }

    /// Every data member with its recorded state. Unreachable members show
    /// as offline, members never touched as pending.
    pub fn node_states(&self) -> Vec<NodeSyncState> {
        self.membership
            .members()
            .into_iter()
            .filter(|m| m.data_node)
            .map(|m| {
                let mut state = self
                    .node_states
                    .get(&m.id)
                    .map(|s| s.value().clone())
                    .unwrap_or_else(|| NodeSyncState::new(m.id.clone()));
                if !m.reachable {
                    state.status = NodeSyncStatus::Offline;
                }
                state
            })
            .collect()
    }

    /// Aggregate view of the cluster
    pub async fn cluster_view(&self) -> ClusterSyncView {
        if !self.config.enabled {
            return ClusterSyncView::disabled();
        }

        let leader = self.elect_leader();
        let local_is_leader = leader.as_deref() == Some(self.local_node_id().as_str());
        let cluster_version = match self.ledger.published_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("Failed to read published version: {}", e);
                None
            }
        };

        ClusterSyncView::new(true, leader, local_is_leader, cluster_version, self.node_states())
    }
}
