use crate::snapshot::PolicySnapshot;

/// Consumer of applied snapshots, typically the policy evaluation engine
pub trait AuthorizationEngine: Send + Sync {
    /// Drop every decision cached against `previous_version`.
    /// Called once per apply that changed the snapshot.
    fn invalidate_cache(&self, previous_version: Option<&str>, snapshot: &PolicySnapshot);
}

/// Policy-level difference between two snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyChange {
    pub added: usize,
    pub removed: usize,
}

impl PolicyChange {
    pub fn between(previous: Option<&PolicySnapshot>, next: &PolicySnapshot) -> Self {
        let Some(previous) = previous else {
            return PolicyChange {
                added: next.policy_count(),
                removed: 0,
            };
        };

        let before = previous.policy_ids();
        let after = next.policy_ids();
        PolicyChange {
            added: after.difference(&before).count(),
            removed: before.difference(&after).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Policy, PolicyEffect};
    use chrono::Utc;
    use serde_json::Value;

    fn snapshot(ids: &[&str]) -> PolicySnapshot {
        PolicySnapshot::new(
            "v",
            Utc::now(),
            ids.iter().map(|id| Policy::new(*id, "", PolicyEffect::Permit)).collect(),
            Value::Null,
        )
    }

    #[test]
    fn test_policy_change() {
        let change = PolicyChange::between(Some(&snapshot(&["a", "b", "c"])), &snapshot(&["b", "c", "d", "e"]));
        assert_eq!(change, PolicyChange { added: 2, removed: 1 });

        let change = PolicyChange::between(None, &snapshot(&["a", "b"]));
        assert_eq!(change, PolicyChange { added: 2, removed: 0 });
    }
}
