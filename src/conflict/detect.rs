use crate::snapshot::PolicySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Relative policy-count delta above which the counts are said to disagree
pub const COUNT_DISCREPANCY_RATIO: f64 = 0.1;

/// Two differing snapshots modified this close together have no trustworthy order
pub const TIMESTAMP_CONFLICT_WINDOW_SECS: i64 = 60;

/// Category of divergence between a local and a remote snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    VersionMismatch,
    PolicyCountDiscrepancy,
    SchemaChange,
    ContentConflict,
    TimestampConflict,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::VersionMismatch => "version-mismatch",
            ConflictType::PolicyCountDiscrepancy => "policy-count-discrepancy",
            ConflictType::SchemaChange => "schema-change",
            ConflictType::ContentConflict => "content-conflict",
            ConflictType::TimestampConflict => "timestamp-conflict",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ConflictType::VersionMismatch => "Local and remote versions differ",
            ConflictType::PolicyCountDiscrepancy => "Policy counts differ by more than 10%",
            ConflictType::SchemaChange => "Schema definitions differ",
            ConflictType::ContentConflict => "Policy id sets differ",
            ConflictType::TimestampConflict => "Modification times too close to order",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of conflicts found between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictReport {
    conflicts: BTreeSet<ConflictType>,
}

impl ConflictReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conflict: ConflictType) {
        self.conflicts.insert(conflict);
    }

    pub fn contains(&self, conflict: ConflictType) -> bool {
        self.conflicts.contains(&conflict)
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConflictType> + '_ {
        self.conflicts.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<ConflictType> {
        self.iter().collect()
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conflicts.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.conflicts.iter().map(|c| c.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

impl FromIterator<ConflictType> for ConflictReport {
    fn from_iter<I: IntoIterator<Item = ConflictType>>(iter: I) -> Self {
        ConflictReport {
            conflicts: iter.into_iter().collect(),
        }
    }
}

/// Classify how `remote` diverges from `local`
pub fn detect_conflicts(local: &PolicySnapshot, remote: &PolicySnapshot) -> ConflictReport {
    let mut report = ConflictReport::new();

    let versions_differ = local.version != remote.version;
    if versions_differ {
        report.insert(ConflictType::VersionMismatch);
    }

    let local_count = local.policy_count();
    let remote_count = remote.policy_count();
    let delta = local_count.abs_diff(remote_count) as f64;
    if delta > local_count as f64 * COUNT_DISCREPANCY_RATIO {
        report.insert(ConflictType::PolicyCountDiscrepancy);
    }

    if local.schema != remote.schema {
        report.insert(ConflictType::SchemaChange);
    }

    let local_ids = local.policy_ids();
    let remote_ids = remote.policy_ids();
    if local_ids.symmetric_difference(&remote_ids).next().is_some() {
        report.insert(ConflictType::ContentConflict);
    }

    // an identical re-fetch shares its timestamp with the local copy
    if versions_differ {
        let gap = (remote.last_modified - local.last_modified).num_seconds().abs();
        if gap < TIMESTAMP_CONFLICT_WINDOW_SECS {
            report.insert(ConflictType::TimestampConflict);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Policy, PolicyEffect};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn snapshot(version: &str, modified: i64, ids: &[&str]) -> PolicySnapshot {
        PolicySnapshot::new(
            version,
            at(modified),
            ids.iter()
                .map(|id| Policy::new(*id, "permit(principal, action, resource);", PolicyEffect::Permit))
                .collect(),
            json!({"entities": {}}),
        )
    }

    #[test]
    fn test_identical_snapshots_have_no_conflicts() {
        let a = snapshot("v1", 0, &["a", "b"]);
        let report = detect_conflicts(&a, &a.clone());
        assert!(report.is_empty());
        assert_eq!(report.to_string(), "none");
    }

    #[test]
    fn test_version_and_timestamp() {
        let local = snapshot("v1", 0, &["a", "b"]);
        let close = snapshot("v2", 30, &["a", "b"]);
        let report = detect_conflicts(&local, &close);
        assert!(report.contains(ConflictType::VersionMismatch));
        assert!(report.contains(ConflictType::TimestampConflict));
        assert_eq!(report.len(), 2);

        let later = snapshot("v2", 600, &["a", "b"]);
        let report = detect_conflicts(&local, &later);
        assert!(report.contains(ConflictType::VersionMismatch));
        assert!(!report.contains(ConflictType::TimestampConflict));
    }

    #[test]
    fn test_count_discrepancy_threshold() {
        let ids: Vec<String> = (0..20).map(|i| format!("p{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

        let local = snapshot("v1", 0, &refs);
        // 2 of 20 is exactly 10%, not more
        let remote = snapshot("v1", 0, &refs[..18]);
        assert!(!detect_conflicts(&local, &remote).contains(ConflictType::PolicyCountDiscrepancy));

        let remote = snapshot("v1", 0, &refs[..17]);
        let report = detect_conflicts(&local, &remote);
        assert!(report.contains(ConflictType::PolicyCountDiscrepancy));
        assert!(report.contains(ConflictType::ContentConflict));
    }

    #[test]
    fn test_content_and_schema() {
        let local = snapshot("v1", 0, &["a", "b"]);
        let mut remote = snapshot("v1", 0, &["a", "c"]);
        remote.schema = json!({"entities": {"User": {}}});

        let report = detect_conflicts(&local, &remote);
        assert!(report.contains(ConflictType::ContentConflict));
        assert!(report.contains(ConflictType::SchemaChange));
        assert!(!report.contains(ConflictType::VersionMismatch));
    }
}
