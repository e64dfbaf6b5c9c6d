//! Snapshot value types
//!
//! A `PolicySnapshot` is never mutated once built. Merges and change sets
//! always produce a fresh snapshot which then replaces the old one atomically.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Whether a policy grants or denies access
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    #[default]
    Permit,
    Forbid,
}

impl PolicyEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEffect::Permit => "permit",
            PolicyEffect::Forbid => "forbid",
        }
    }
}

/// A single authorization policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    /// Unique id within a snapshot
    pub id: String,

    /// Policy source text, opaque to this crate
    pub content: String,

    /// Permit or forbid
    #[serde(default)]
    pub effect: PolicyEffect,

    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Last modification time reported by the source
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Policy {
    /// Create a policy without description or modification time
    pub fn new(id: impl Into<String>, content: impl Into<String>, effect: PolicyEffect) -> Self {
        Policy {
            id: id.into(),
            content: content.into(),
            effect,
            description: None,
            updated_at: None,
        }
    }
}

/// Complete, versioned policy set as served by the policy source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySnapshot {
    /// Opaque version identifier
    pub version: String,

    /// When the source last modified this policy set
    pub last_modified: DateTime<Utc>,

    /// Policies, ids unique
    #[serde(default)]
    pub policies: Vec<Policy>,

    /// Opaque schema blob
    #[serde(default)]
    pub schema: Value,

    /// Free-form provenance notes (merge lineage, change-set base, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl PolicySnapshot {
    /// Create a snapshot with empty metadata
    pub fn new(
        version: impl Into<String>,
        last_modified: DateTime<Utc>,
        policies: Vec<Policy>,
        schema: Value,
    ) -> Self {
        PolicySnapshot {
            version: version.into(),
            last_modified,
            policies,
            schema,
            metadata: BTreeMap::new(),
        }
    }

    /// Number of policies in the snapshot
    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Set of policy ids
    pub fn policy_ids(&self) -> BTreeSet<&str> {
        self.policies.iter().map(|p| p.id.as_str()).collect()
    }

    /// Look up a policy by id
    pub fn policy(&self, id: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.id == id)
    }

    /// Check the structural invariants: non-empty version, non-empty and
    /// unique policy ids
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::InvalidSnapshot("snapshot version is empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.policies.len());
        for policy in &self.policies {
            if policy.id.trim().is_empty() {
                return Err(Error::InvalidSnapshot(format!(
                    "snapshot {} contains a policy with an empty id",
                    self.version
                )));
            }
            if !seen.insert(policy.id.as_str()) {
                return Err(Error::InvalidSnapshot(format!(
                    "snapshot {} contains duplicate policy id {}",
                    self.version, policy.id
                )));
            }
        }

        Ok(())
    }

    /// BLAKE3 digest over the policy set (in id order) and the schema.
    /// Two snapshots with equal checksums carry the same rules regardless
    /// of version string or provenance metadata.
    pub fn checksum(&self) -> String {
        let mut sorted: Vec<&Policy> = self.policies.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut hasher = blake3::Hasher::new();
        for policy in sorted {
            hasher.update(policy.id.as_bytes());
            hasher.update(&[0]);
            hasher.update(policy.content.as_bytes());
            hasher.update(&[0]);
            hasher.update(policy.effect.as_str().as_bytes());
            hasher.update(&[0]);
            if let Some(updated_at) = policy.updated_at {
                hasher.update(updated_at.to_rfc3339().as_bytes());
            }
            hasher.update(&[0xff]);
        }
        hasher.update(self.schema.to_string().as_bytes());

        hasher.finalize().to_hex().to_string()
    }

    /// Same rules and schema, ignoring version and metadata
    pub fn same_content(&self, other: &PolicySnapshot) -> bool {
        self.policy_count() == other.policy_count() && self.checksum() == other.checksum()
    }
}

/// Cheap change-detection record returned by the source's metadata endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceMetadata {
    pub version: String,
    pub last_modified: DateTime<Utc>,
    pub policy_count: usize,
    #[serde(default)]
    pub checksum: String,
}

/// Policies changed since a base version, as served by a source change feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyDelta {
    /// Version the change set was computed against
    pub base_version: String,

    /// Version the change set produces
    pub version: String,

    pub last_modified: DateTime<Utc>,

    /// Added or modified policies
    #[serde(default)]
    pub upserted: Vec<Policy>,

    /// Ids of deleted policies
    #[serde(default)]
    pub removed: Vec<String>,

    /// Replacement schema, if the schema changed
    #[serde(default)]
    pub schema: Option<Value>,
}

impl PolicyDelta {
    /// Produce the snapshot obtained by applying this change set to `base`
    pub fn apply_to(&self, base: &PolicySnapshot) -> Result<PolicySnapshot> {
        if base.version != self.base_version {
            return Err(Error::DeltaMismatch(format!(
                "change set is based on {} but local snapshot is {}",
                self.base_version, base.version
            )));
        }

        let mut by_id: BTreeMap<String, Policy> = base
            .policies
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();

        for id in &self.removed {
            by_id.remove(id);
        }
        for policy in &self.upserted {
            by_id.insert(policy.id.clone(), policy.clone());
        }

        let mut metadata = base.metadata.clone();
        metadata.insert(
            "delta_base_version".to_string(),
            Value::String(self.base_version.clone()),
        );

        let snapshot = PolicySnapshot {
            version: self.version.clone(),
            last_modified: self.last_modified,
            policies: by_id.into_values().collect(),
            schema: self.schema.clone().unwrap_or_else(|| base.schema.clone()),
            metadata,
        };
        snapshot.validate()?;

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn test_snapshot(version: &str, ids: &[&str]) -> PolicySnapshot {
        PolicySnapshot::new(
            version,
            at(0),
            ids.iter()
                .map(|id| Policy::new(*id, format!("permit(principal, action, resource) // {}", id), PolicyEffect::Permit))
                .collect(),
            json!({"entities": {}}),
        )
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let snapshot = test_snapshot("v1", &["a", "b", "a"]);
        let err = snapshot.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidSnapshot(_)));
    }

    #[test]
    fn test_validate_rejects_empty_version() {
        let snapshot = test_snapshot("  ", &["a"]);
        assert!(snapshot.validate().is_err());
        assert!(test_snapshot("v1", &["a", "b"]).validate().is_ok());
    }

    #[test]
    fn test_checksum_ignores_order_and_version() {
        let a = test_snapshot("v1", &["a", "b", "c"]);
        let mut b = test_snapshot("v2", &["c", "a", "b"]);
        b.metadata.insert("note".to_string(), json!("reordered"));

        assert_eq!(a.checksum(), b.checksum());
        assert!(a.same_content(&b));

        let c = test_snapshot("v1", &["a", "b"]);
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn test_checksum_sees_schema_change() {
        let a = test_snapshot("v1", &["a"]);
        let mut b = a.clone();
        b.schema = json!({"entities": {"User": {}}});
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_delta_apply() {
        let base = test_snapshot("v1", &["a", "b", "c"]);
        let delta = PolicyDelta {
            base_version: "v1".to_string(),
            version: "v2".to_string(),
            last_modified: at(120),
            upserted: vec![Policy::new("d", "forbid(principal, action, resource);", PolicyEffect::Forbid)],
            removed: vec!["b".to_string()],
            schema: None,
        };

        let next = delta.apply_to(&base).unwrap();
        assert_eq!(next.version, "v2");
        assert_eq!(next.policy_ids().into_iter().collect::<Vec<_>>(), vec!["a", "c", "d"]);
        assert_eq!(next.schema, base.schema);
        assert_eq!(next.metadata.get("delta_base_version"), Some(&json!("v1")));

        // base is untouched
        assert_eq!(base.policy_count(), 3);
    }

    #[test]
    fn test_delta_base_mismatch() {
        let base = test_snapshot("v3", &["a"]);
        let delta = PolicyDelta {
            base_version: "v1".to_string(),
            version: "v2".to_string(),
            last_modified: at(0),
            upserted: Vec::new(),
            removed: Vec::new(),
            schema: None,
        };
        assert!(matches!(delta.apply_to(&base), Err(Error::DeltaMismatch(_))));
    }

    #[test]
    fn test_wire_format() {
        let body = json!({
            "version": "42",
            "last_modified": "2024-05-01T10:00:00Z",
            "policies": [
                {"id": "p1", "content": "permit(...);", "effect": "permit", "updated_at": "2024-05-01T09:00:00Z"},
                {"id": "p2", "content": "forbid(...);", "effect": "forbid"}
            ],
            "schema": {"entities": {}},
            "metadata": {"source": "test"}
        });

        let snapshot: PolicySnapshot = serde_json::from_value(body).unwrap();
        assert_eq!(snapshot.version, "42");
        assert_eq!(snapshot.policy_count(), 2);
        assert_eq!(snapshot.policy("p2").unwrap().effect, PolicyEffect::Forbid);
        assert!(snapshot.policy("p2").unwrap().updated_at.is_none());
        assert!(snapshot.policy("p1").unwrap().updated_at.is_some());
    }
}
