//! Synchronizer status reporting

use crate::cluster::{ClusterHealth, ClusterSyncView};
use crate::conflict::{ConflictType, ResolutionPolicy};
use crate::strategy::SyncStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consecutive failures at which the synchronizer is degraded
pub const DEGRADED_FAILURES: u32 = 3;

/// Consecutive failures at which the synchronizer is critical
pub const CRITICAL_FAILURES: u32 = 5;

/// Where a sync attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptPhase {
    Idle,
    Fetching,
    ConflictCheck,
    Resolved,
    ClusterCoordination,
    Apply,
}

/// How a sync attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SyncOutcome {
    /// A resolved snapshot was swapped in
    Applied { version: String, changed: bool },
    /// The source reported nothing new
    Unchanged { version: Option<String> },
    /// The resolver kept the local snapshot
    KeptLocal { reason: String },
    FetchFailed { error: String },
    NeedsManualReview { reason: String },
    Aborted { reason: String },
    CoordinationFailed { reason: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Applied { .. } | SyncOutcome::Unchanged { .. } | SyncOutcome::KeptLocal { .. }
        )
    }

    /// Whether the applied snapshot changed
    pub fn changed(&self) -> bool {
        matches!(self, SyncOutcome::Applied { changed: true, .. })
    }

    /// Failure description, if the attempt failed
    pub fn error(&self) -> Option<&str> {
        match self {
            SyncOutcome::FetchFailed { error } => Some(error.as_str()),
            SyncOutcome::NeedsManualReview { reason }
            | SyncOutcome::Aborted { reason }
            | SyncOutcome::CoordinationFailed { reason } => Some(reason.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Applied { version, changed } => {
                write!(f, "applied {}{}", version, if *changed { "" } else { " (no change)" })
            }
            SyncOutcome::Unchanged { version } => {
                write!(f, "unchanged at {}", version.as_deref().unwrap_or("none"))
            }
            SyncOutcome::KeptLocal { reason } => write!(f, "kept local: {}", reason),
            SyncOutcome::FetchFailed { error } => write!(f, "fetch failed: {}", error),
            SyncOutcome::NeedsManualReview { reason } => write!(f, "needs manual review: {}", reason),
            SyncOutcome::Aborted { reason } => write!(f, "aborted: {}", reason),
            SyncOutcome::CoordinationFailed { reason } => write!(f, "coordination failed: {}", reason),
        }
    }
}

/// Overall health of the local synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncHealthStatus {
    Healthy,
    Degraded,
    Critical,
    Disabled,
}

impl fmt::Display for SyncHealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncHealthStatus::Healthy => "healthy",
            SyncHealthStatus::Degraded => "degraded",
            SyncHealthStatus::Critical => "critical",
            SyncHealthStatus::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the synchronizer and the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchronizerStatus {
    pub enabled: bool,
    pub running: bool,
    pub node_id: String,
    pub policy_store_id: String,
    pub configured_strategy: SyncStrategy,
    pub active_strategy: SyncStrategy,
    pub adaptive_strategy: bool,
    pub conflict_resolution: ResolutionPolicy,
    pub current_version: Option<String>,
    pub policy_count: usize,
    pub checksum: Option<String>,
    pub last_known_version: Option<String>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub phase: AttemptPhase,
    pub last_outcome: Option<SyncOutcome>,
    pub last_error: Option<String>,
    pub unresolved_conflicts: Vec<ConflictType>,
    pub cluster: ClusterSyncView,
}

impl SynchronizerStatus {
    pub fn health(&self) -> SyncHealthStatus {
        if !self.enabled {
            return SyncHealthStatus::Disabled;
        }
        if self.consecutive_failures >= CRITICAL_FAILURES {
            return SyncHealthStatus::Critical;
        }
        if self.consecutive_failures >= DEGRADED_FAILURES {
            return SyncHealthStatus::Degraded;
        }
        match self.cluster.health {
            ClusterHealth::Critical => SyncHealthStatus::Critical,
            ClusterHealth::Degraded => SyncHealthStatus::Degraded,
            _ => SyncHealthStatus::Healthy,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.enabled
            && self.consecutive_failures < DEGRADED_FAILURES
            && self.cluster.health != ClusterHealth::Critical
    }

    pub fn requires_attention(&self) -> bool {
        self.health() == SyncHealthStatus::Critical
            || !self.unresolved_conflicts.is_empty()
            || self.cluster.requires_immediate_attention()
    }

    /// Minutes since the last successful sync, `None` if there never was one
    pub fn minutes_since_last_sync(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_successful_sync.map(|at| (now - at).num_minutes())
    }

    /// Success rate over all attempts (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 1.0;
        }
        self.successful_attempts as f64 / self.total_attempts as f64
    }

    pub fn summary(&self) -> String {
        format!(
            "Sync {} on {}: version {} ({} policies), strategy {}, {} consecutive failures, {:.0}% success; {}",
            self.health(),
            self.node_id,
            self.current_version.as_deref().unwrap_or("none"),
            self.policy_count,
            self.active_strategy,
            self.consecutive_failures,
            self.success_rate() * 100.0,
            self.cluster.summary()
        )
    }
}
