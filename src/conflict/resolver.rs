use super::detect::{detect_conflicts, ConflictReport, ConflictType};
use super::merge::merge_snapshots;
use crate::config::normalize_enum_token;
use crate::snapshot::PolicySnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// How divergent local and remote snapshots are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum ResolutionPolicy {
    /// Always take the remote snapshot
    RemoteWins,
    /// Always keep the local snapshot
    LocalWins,
    /// The strictly later `last_modified` wins, ties keep local
    TimestampBased,
    /// Union of both policy sets
    MergePolicies,
    /// Never resolve automatically
    ManualReview,
    /// Keep local whatever the conflicts
    FailSafe,
}

impl ResolutionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPolicy::RemoteWins => "remote-wins",
            ResolutionPolicy::LocalWins => "local-wins",
            ResolutionPolicy::TimestampBased => "timestamp-based",
            ResolutionPolicy::MergePolicies => "merge-policies",
            ResolutionPolicy::ManualReview => "manual-review",
            ResolutionPolicy::FailSafe => "fail-safe",
        }
    }
}

impl fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_enum_token(s).as_str() {
            "remote-wins" | "remote" => Ok(ResolutionPolicy::RemoteWins),
            "local-wins" | "local" => Ok(ResolutionPolicy::LocalWins),
            "timestamp-based" | "timestamp" => Ok(ResolutionPolicy::TimestampBased),
            "merge-policies" | "merge" => Ok(ResolutionPolicy::MergePolicies),
            "manual-review" | "manual" => Ok(ResolutionPolicy::ManualReview),
            "fail-safe" | "failsafe" => Ok(ResolutionPolicy::FailSafe),
            other => Err(format!("unknown conflict resolution policy: {}", other)),
        }
    }
}

impl TryFrom<String> for ResolutionPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Which side a merge keeps when a shared policy lacks `updated_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum MergeTieBreak {
    PreferRemote,
    PreferLocal,
}

impl FromStr for MergeTieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_enum_token(s).as_str() {
            "prefer-remote" | "remote" => Ok(MergeTieBreak::PreferRemote),
            "prefer-local" | "local" => Ok(MergeTieBreak::PreferLocal),
            other => Err(format!("unknown merge tie-break: {}", other)),
        }
    }
}

impl TryFrom<String> for MergeTieBreak {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What the synchronizer should do with the fetched snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionAction {
    AcceptRemote,
    KeepLocal,
    AcceptMerged,
    NeedsManualReview,
    Abort,
}

impl ResolutionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionAction::AcceptRemote => "accept-remote",
            ResolutionAction::KeepLocal => "keep-local",
            ResolutionAction::AcceptMerged => "accept-merged",
            ResolutionAction::NeedsManualReview => "needs-manual-review",
            ResolutionAction::Abort => "abort",
        }
    }

    /// The conflict was settled automatically
    pub fn is_successful(&self) -> bool {
        !matches!(
            self,
            ResolutionAction::NeedsManualReview | ResolutionAction::Abort
        )
    }

    /// A new snapshot should be applied
    pub fn should_proceed(&self) -> bool {
        matches!(
            self,
            ResolutionAction::AcceptRemote | ResolutionAction::AcceptMerged
        )
    }
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of reconciling one fetched snapshot with the local one
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub action: ResolutionAction,

    /// Snapshot to apply; present only for accept-remote and accept-merged
    pub snapshot: Option<Arc<PolicySnapshot>>,

    /// Everything detected between the two snapshots
    pub conflicts: ConflictReport,

    /// Conflicts left for an operator
    pub unresolved: Vec<ConflictType>,

    pub reason: String,
}

impl ResolutionOutcome {
    fn accept_remote(remote: Arc<PolicySnapshot>, conflicts: ConflictReport, reason: impl Into<String>) -> Self {
        ResolutionOutcome {
            action: ResolutionAction::AcceptRemote,
            snapshot: Some(remote),
            conflicts,
            unresolved: Vec::new(),
            reason: reason.into(),
        }
    }

    fn accept_merged(merged: PolicySnapshot, conflicts: ConflictReport) -> Self {
        ResolutionOutcome {
            action: ResolutionAction::AcceptMerged,
            reason: format!("Merged {} policies from local and remote", merged.policy_count()),
            snapshot: Some(Arc::new(merged)),
            conflicts,
            unresolved: Vec::new(),
        }
    }

    fn keep_local(conflicts: ConflictReport, reason: impl Into<String>) -> Self {
        ResolutionOutcome {
            action: ResolutionAction::KeepLocal,
            snapshot: None,
            conflicts,
            unresolved: Vec::new(),
            reason: reason.into(),
        }
    }

    fn needs_manual_review(conflicts: ConflictReport) -> Self {
        ResolutionOutcome {
            action: ResolutionAction::NeedsManualReview,
            snapshot: None,
            unresolved: conflicts.to_vec(),
            reason: format!("Manual review required for conflicts: {}", conflicts),
            conflicts,
        }
    }

    fn abort(conflicts: ConflictReport, reason: impl Into<String>) -> Self {
        ResolutionOutcome {
            action: ResolutionAction::Abort,
            snapshot: None,
            unresolved: conflicts.to_vec(),
            conflicts,
            reason: reason.into(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.action.is_successful()
    }

    pub fn should_proceed(&self) -> bool {
        self.action.should_proceed()
    }
}

/// Applies a [`ResolutionPolicy`] to a local/remote snapshot pair
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    policy: ResolutionPolicy,
    tie_break: MergeTieBreak,
}

impl ConflictResolver {
    pub fn new(policy: ResolutionPolicy, tie_break: MergeTieBreak) -> Self {
        ConflictResolver { policy, tie_break }
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    /// Reconcile `remote` with the local snapshot, if there is one
    pub fn resolve(
        &self,
        local: Option<&PolicySnapshot>,
        remote: Arc<PolicySnapshot>,
    ) -> ResolutionOutcome {
        if let Err(e) = remote.validate() {
            return ResolutionOutcome::abort(ConflictReport::new(), e.to_string());
        }

        let Some(local) = local else {
            return ResolutionOutcome::accept_remote(
                remote,
                ConflictReport::new(),
                "Initial synchronization, no local snapshot",
            );
        };

        let conflicts = detect_conflicts(local, &remote);
        if conflicts.is_empty() {
            return ResolutionOutcome::accept_remote(remote, conflicts, "No conflicts detected");
        }

        debug!(
            "Resolving conflicts [{}] between local {} and remote {} with {}",
            conflicts, local.version, remote.version, self.policy
        );

        match self.policy {
            ResolutionPolicy::RemoteWins => {
                ResolutionOutcome::accept_remote(remote, conflicts, "Remote snapshot wins")
            }
            ResolutionPolicy::LocalWins => {
                ResolutionOutcome::keep_local(conflicts, "Local snapshot wins")
            }
            ResolutionPolicy::TimestampBased => {
                if remote.last_modified > local.last_modified {
                    ResolutionOutcome::accept_remote(remote, conflicts, "Remote snapshot is newer")
                } else {
                    ResolutionOutcome::keep_local(conflicts, "Local snapshot is as new or newer")
                }
            }
            ResolutionPolicy::MergePolicies => {
                match merge_snapshots(local, &remote, self.tie_break) {
                    Ok(merged) => ResolutionOutcome::accept_merged(merged, conflicts),
                    Err(e) => {
                        warn!("Policy merge failed, accepting remote snapshot: {}", e);
                        ResolutionOutcome::accept_remote(
                            remote,
                            conflicts,
                            format!("Merge failed ({}), accepted remote", e),
                        )
                    }
                }
            }
            ResolutionPolicy::ManualReview => ResolutionOutcome::needs_manual_review(conflicts),
            ResolutionPolicy::FailSafe => {
                ResolutionOutcome::keep_local(conflicts, "Fail-safe keeps the local snapshot")
            }
        }
    }
}
