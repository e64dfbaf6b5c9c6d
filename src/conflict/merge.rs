use super::MergeTieBreak;
use crate::error::{Error, Result};
use crate::snapshot::{Policy, PolicySnapshot};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;

/// Union of the policies of both snapshots keyed by id.
///
/// For ids present on both sides the later `updated_at` wins and equal
/// timestamps favour remote. When either side lacks `updated_at` the
/// `tie_break` decides. Schema and version come from `remote`; the result is
/// ordered by policy id so it does not depend on input order.
pub fn merge_snapshots(
    local: &PolicySnapshot,
    remote: &PolicySnapshot,
    tie_break: MergeTieBreak,
) -> Result<PolicySnapshot> {
    let local_by_id = index_policies(local)?;
    let mut merged = index_policies(remote)?;

    for (id, local_policy) in local_by_id {
        let keep_local = match merged.get(id) {
            None => true,
            Some(remote_policy) => match (local_policy.updated_at, remote_policy.updated_at) {
                (Some(l), Some(r)) => l > r,
                _ => tie_break == MergeTieBreak::PreferLocal,
            },
        };
        if keep_local {
            merged.insert(id, local_policy);
        }
    }

    let mut metadata = remote.metadata.clone();
    metadata.insert("merge_source".to_string(), Value::from("local+remote"));
    metadata.insert("local_version".to_string(), Value::from(local.version.clone()));
    metadata.insert("remote_version".to_string(), Value::from(remote.version.clone()));
    metadata.insert("merge_timestamp".to_string(), Value::from(Utc::now().to_rfc3339()));

    Ok(PolicySnapshot {
        version: remote.version.clone(),
        last_modified: local.last_modified.max(remote.last_modified),
        policies: merged.into_values().cloned().collect(),
        schema: remote.schema.clone(),
        metadata,
    })
}

fn index_policies(snapshot: &PolicySnapshot) -> Result<BTreeMap<&str, &Policy>> {
    let mut by_id = BTreeMap::new();
    for policy in &snapshot.policies {
        if by_id.insert(policy.id.as_str(), policy).is_some() {
            return Err(Error::Merge(format!(
                "snapshot {} contains policy {} more than once",
                snapshot.version, policy.id
            )));
        }
    }
    Ok(by_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::PolicyEffect;
    use chrono::{DateTime, TimeZone};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn policy(id: &str, content: &str, updated: Option<i64>) -> Policy {
        Policy {
            updated_at: updated.map(at),
            ..Policy::new(id, content, PolicyEffect::Permit)
        }
    }

    fn snapshot(version: &str, policies: Vec<Policy>) -> PolicySnapshot {
        PolicySnapshot::new(version, at(0), policies, json!({"version": version}))
    }

    fn ids(snapshot: &PolicySnapshot) -> Vec<&str> {
        snapshot.policies.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_disjoint_union_is_order_independent() {
        let a = snapshot("v1", vec![policy("c", "c", None), policy("a", "a", None)]);
        let b = snapshot("v2", vec![policy("b", "b", None), policy("d", "d", None)]);

        let ab = merge_snapshots(&a, &b, MergeTieBreak::PreferRemote).unwrap();
        let ba = merge_snapshots(&b, &a, MergeTieBreak::PreferRemote).unwrap();

        assert_eq!(ids(&ab), vec!["a", "b", "c", "d"]);
        assert_eq!(ab.policies, ba.policies);
    }

    #[test]
    fn test_later_update_wins() {
        let local = snapshot("v1", vec![policy("p", "local", Some(100)), policy("q", "local", Some(10))]);
        let remote = snapshot("v2", vec![policy("p", "remote", Some(50)), policy("q", "remote", Some(20))]);

        let merged = merge_snapshots(&local, &remote, MergeTieBreak::PreferRemote).unwrap();
        assert_eq!(merged.policy("p").unwrap().content, "local");
        assert_eq!(merged.policy("q").unwrap().content, "remote");
    }

    #[test]
    fn test_equal_timestamps_favour_remote() {
        let local = snapshot("v1", vec![policy("p", "local", Some(100))]);
        let remote = snapshot("v2", vec![policy("p", "remote", Some(100))]);

        let merged = merge_snapshots(&local, &remote, MergeTieBreak::PreferLocal).unwrap();
        assert_eq!(merged.policy("p").unwrap().content, "remote");
    }

    #[test]
    fn test_missing_timestamp_uses_tie_break() {
        let local = snapshot("v1", vec![policy("p", "local", Some(500))]);
        let remote = snapshot("v2", vec![policy("p", "remote", None)]);

        let merged = merge_snapshots(&local, &remote, MergeTieBreak::PreferRemote).unwrap();
        assert_eq!(merged.policy("p").unwrap().content, "remote");

        let merged = merge_snapshots(&local, &remote, MergeTieBreak::PreferLocal).unwrap();
        assert_eq!(merged.policy("p").unwrap().content, "local");
    }

    #[test]
    fn test_provenance_and_schema() {
        let mut local = snapshot("v1", vec![policy("a", "a", None)]);
        local.last_modified = at(900);
        let remote = snapshot("v2", vec![policy("b", "b", None)]);

        let merged = merge_snapshots(&local, &remote, MergeTieBreak::PreferRemote).unwrap();
        assert_eq!(merged.version, "v2");
        assert_eq!(merged.schema, json!({"version": "v2"}));
        assert_eq!(merged.last_modified, at(900));
        assert_eq!(merged.metadata.get("local_version"), Some(&json!("v1")));
        assert_eq!(merged.metadata.get("remote_version"), Some(&json!("v2")));
        assert!(merged.metadata.contains_key("merge_timestamp"));
    }

    #[test]
    fn test_duplicate_ids_fail() {
        let local = snapshot("v1", vec![policy("a", "1", None), policy("a", "2", None)]);
        let remote = snapshot("v2", vec![policy("b", "b", None)]);
        assert!(matches!(
            merge_snapshots(&local, &remote, MergeTieBreak::PreferRemote),
            Err(Error::Merge(_))
        ));
    }
}
