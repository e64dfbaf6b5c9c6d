//! Per-node sync state and the cluster health roll-up

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node without a recorded success for this long is not eligible as leader
pub const NODE_HEALTH_WINDOW_SECS: i64 = 300;

/// Attempts beyond which a node needs an operator's attention
pub const MAX_QUIET_ATTEMPTS: u32 = 3;

/// Sync state of one cluster member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeSyncStatus {
    Synchronized,
    Syncing,
    Pending,
    Failed,
    Conflict,
    Offline,
    Excluded,
}

impl NodeSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeSyncStatus::Synchronized => "synchronized",
            NodeSyncStatus::Syncing => "syncing",
            NodeSyncStatus::Pending => "pending",
            NodeSyncStatus::Failed => "failed",
            NodeSyncStatus::Conflict => "conflict",
            NodeSyncStatus::Offline => "offline",
            NodeSyncStatus::Excluded => "excluded",
        }
    }
}

impl fmt::Display for NodeSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the coordinator last recorded about a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSyncState {
    pub node_id: String,
    pub version: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    /// Last time the node was recorded as synchronized
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    pub status: NodeSyncStatus,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<u64>,
    /// Consecutive attempts; only failures push this above one
    pub attempts: u32,
}

impl NodeSyncState {
    pub fn new(node_id: impl Into<String>) -> Self {
        NodeSyncState {
            node_id: node_id.into(),
            version: None,
            last_sync: None,
            last_success: None,
            status: NodeSyncStatus::Pending,
            last_error: None,
            last_duration_ms: None,
            attempts: 0,
        }
    }

    /// State after an update attempt
    pub fn with_update(
        &self,
        version: Option<String>,
        status: NodeSyncStatus,
        error: Option<String>,
        duration: Option<std::time::Duration>,
    ) -> Self {
        let attempts = if status == NodeSyncStatus::Failed {
            self.attempts + 1
        } else {
            1
        };

        let now = Utc::now();
        let last_success = if status == NodeSyncStatus::Synchronized {
            Some(now)
        } else {
            self.last_success
        };

        NodeSyncState {
            node_id: self.node_id.clone(),
            version: version.or_else(|| self.version.clone()),
            last_sync: Some(now),
            last_success,
            status,
            last_error: error,
            last_duration_ms: duration.map(|d| d.as_millis() as u64),
            attempts,
        }
    }

    pub fn requires_attention(&self) -> bool {
        matches!(self.status, NodeSyncStatus::Failed | NodeSyncStatus::Conflict)
            || self.attempts > MAX_QUIET_ATTEMPTS
    }

    /// No sync recorded within `threshold` of `now`
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match self.last_sync {
            Some(at) => now - at > threshold,
            None => true,
        }
    }

    /// Usable as a rollout leader: a success within the health window and
    /// not failed, offline or excluded since
    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        if matches!(
            self.status,
            NodeSyncStatus::Failed | NodeSyncStatus::Offline | NodeSyncStatus::Excluded
        ) {
            return false;
        }
        match self.last_success {
            Some(at) => now - at <= Duration::seconds(NODE_HEALTH_WINDOW_SECS),
            None => false,
        }
    }
}

/// Cluster health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterHealth {
    Healthy,
    MostlyHealthy,
    Degraded,
    Critical,
    Disabled,
}

impl ClusterHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterHealth::Healthy => "healthy",
            ClusterHealth::MostlyHealthy => "mostly-healthy",
            ClusterHealth::Degraded => "degraded",
            ClusterHealth::Critical => "critical",
            ClusterHealth::Disabled => "disabled",
        }
    }

    /// Classify `synchronized` out of `total` nodes.
    /// An empty cluster has nothing out of sync.
    pub fn classify(synchronized: usize, total: usize) -> ClusterHealth {
        if total == 0 || synchronized >= total {
            ClusterHealth::Healthy
        } else if synchronized * 100 >= total * 80 {
            ClusterHealth::MostlyHealthy
        } else if synchronized * 100 >= total * 50 {
            ClusterHealth::Degraded
        } else {
            ClusterHealth::Critical
        }
    }
}

impl fmt::Display for ClusterHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster-wide roll-up of node states
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSyncView {
    pub distributed_enabled: bool,
    pub health: ClusterHealth,
    pub leader_id: Option<String>,
    pub local_is_leader: bool,
    pub cluster_version: Option<String>,
    pub total_nodes: usize,
    pub synchronized: usize,
    pub syncing: usize,
    pub pending: usize,
    pub failed: usize,
    pub conflict: usize,
    pub offline: usize,
    pub excluded: usize,
    pub nodes: Vec<NodeSyncState>,
}

impl ClusterSyncView {
    pub fn new(
        distributed_enabled: bool,
        leader_id: Option<String>,
        local_is_leader: bool,
        cluster_version: Option<String>,
        mut nodes: Vec<NodeSyncState>,
    ) -> Self {
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        let count = |status: NodeSyncStatus| nodes.iter().filter(|n| n.status == status).count();

        let synchronized = count(NodeSyncStatus::Synchronized);
        let health = if distributed_enabled {
            ClusterHealth::classify(synchronized, nodes.len())
        } else {
            ClusterHealth::Disabled
        };

        ClusterSyncView {
            distributed_enabled,
            health,
            leader_id,
            local_is_leader,
            cluster_version,
            total_nodes: nodes.len(),
            synchronized,
            syncing: count(NodeSyncStatus::Syncing),
            pending: count(NodeSyncStatus::Pending),
            failed: count(NodeSyncStatus::Failed),
            conflict: count(NodeSyncStatus::Conflict),
            offline: count(NodeSyncStatus::Offline),
            excluded: count(NodeSyncStatus::Excluded),
            nodes,
        }
    }

    /// View for a node with distributed sync turned off
    pub fn disabled() -> Self {
        Self::new(false, None, false, None, Vec::new())
    }

    pub fn synchronized_percentage(&self) -> f64 {
        if self.total_nodes == 0 {
            return 100.0;
        }
        self.synchronized as f64 * 100.0 / self.total_nodes as f64
    }

    pub fn requires_immediate_attention(&self) -> bool {
        self.health == ClusterHealth::Critical || self.failed * 2 > self.total_nodes
    }

    pub fn summary(&self) -> String {
        format!(
            "Cluster {}: {}/{} synchronized ({:.1}%), {} failed, leader {}",
            self.health,
            self.synchronized,
            self.total_nodes,
            self.synchronized_percentage(),
            self.failed,
            self.leader_id.as_deref().unwrap_or("none")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, status: NodeSyncStatus) -> NodeSyncState {
        NodeSyncState {
            status,
            ..NodeSyncState::new(id)
        }
    }

    fn view(synced: usize, other: usize) -> ClusterSyncView {
        let mut nodes = Vec::new();
        for i in 0..synced {
            nodes.push(node(&format!("s{}", i), NodeSyncStatus::Synchronized));
        }
        for i in 0..other {
            nodes.push(node(&format!("f{}", i), NodeSyncStatus::Failed));
        }
        ClusterSyncView::new(true, None, false, None, nodes)
    }

    #[test]
    fn test_health_boundaries() {
        assert_eq!(view(5, 0).health, ClusterHealth::Healthy);
        assert_eq!(view(4, 1).health, ClusterHealth::MostlyHealthy);
        assert_eq!(view(8, 2).health, ClusterHealth::MostlyHealthy);
        assert_eq!(view(7, 3).health, ClusterHealth::Degraded);
        assert_eq!(view(1, 1).health, ClusterHealth::Degraded);
        assert_eq!(view(4, 5).health, ClusterHealth::Critical);
        assert_eq!(view(0, 0).health, ClusterHealth::Healthy);
    }

    #[test]
    fn test_disabled_view() {
        let view = ClusterSyncView::disabled();
        assert_eq!(view.health, ClusterHealth::Disabled);
        assert!(!view.requires_immediate_attention());
    }

    #[test]
    fn test_immediate_attention() {
        assert!(view(1, 3).requires_immediate_attention());
        assert!(!view(4, 1).requires_immediate_attention());
        assert_eq!(view(4, 1).failed, 1);
        assert!(view(4, 1).summary().contains("4/5 synchronized (80.0%)"));
    }

    #[test]
    fn test_with_update_counts_failures() {
        let state = NodeSyncState::new("n1");
        let failed = state.with_update(None, NodeSyncStatus::Failed, Some("timeout".to_string()), None);
        let failed = failed.with_update(None, NodeSyncStatus::Failed, Some("timeout".to_string()), None);
        assert_eq!(failed.attempts, 2);
        assert!(failed.requires_attention());

        let ok = failed.with_update(
            Some("v2".to_string()),
            NodeSyncStatus::Synchronized,
            None,
            Some(std::time::Duration::from_millis(40)),
        );
        assert_eq!(ok.attempts, 1);
        assert_eq!(ok.version.as_deref(), Some("v2"));
        assert_eq!(ok.last_duration_ms, Some(40));
        assert!(!ok.requires_attention());
    }

    #[test]
    fn test_health_window() {
        let now = Utc::now();
        let mut state = NodeSyncState::new("n1").with_update(
            Some("v1".to_string()),
            NodeSyncStatus::Synchronized,
            None,
            None,
        );
        assert!(state.is_healthy(now));

        state.last_success = Some(now - Duration::minutes(10));
        assert!(!state.is_healthy(now));

        // a round in progress keeps the last success
        let syncing = state.with_update(None, NodeSyncStatus::Syncing, None, None);
        assert_eq!(syncing.last_success, state.last_success);
        assert!(!syncing.is_healthy(now));

        let failed = NodeSyncState::new("n1")
            .with_update(None, NodeSyncStatus::Synchronized, None, None)
            .with_update(None, NodeSyncStatus::Failed, Some("refused".to_string()), None);
        assert!(!failed.is_healthy(Utc::now()));
    }

    #[test]
    fn test_no_success_is_not_healthy() {
        let now = Utc::now();
        for status in [NodeSyncStatus::Pending, NodeSyncStatus::Syncing, NodeSyncStatus::Conflict] {
            let state = NodeSyncState::new("n1").with_update(None, status, None, None);
            assert!(!state.is_stale(Duration::minutes(5), now));
            assert!(!state.is_healthy(now), "{}", status);
        }
    }
}
