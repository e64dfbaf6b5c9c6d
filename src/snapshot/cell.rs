use super::PolicySnapshot;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Holder for the currently applied snapshot.
///
/// Readers always see either the previous or the new snapshot in full;
/// replacement is a single pointer swap.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: ArcSwapOption<PolicySnapshot>,
}

impl SnapshotCell {
    /// Create an empty cell
    pub fn empty() -> Self {
        SnapshotCell {
            current: ArcSwapOption::empty(),
        }
    }

    /// Create a cell already holding `snapshot`
    pub fn new(snapshot: PolicySnapshot) -> Self {
        SnapshotCell {
            current: ArcSwapOption::from_pointee(snapshot),
        }
    }

    /// Current snapshot, if any
    pub fn load(&self) -> Option<Arc<PolicySnapshot>> {
        self.current.load_full()
    }

    /// Install `snapshot`, returning the one it replaced
    pub fn replace(&self, snapshot: Arc<PolicySnapshot>) -> Option<Arc<PolicySnapshot>> {
        self.current.swap(Some(snapshot))
    }

    pub fn version(&self) -> Option<String> {
        self.current.load().as_ref().map(|s| s.version.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    #[test]
    fn test_replace_returns_previous() {
        let cell = SnapshotCell::empty();
        assert!(cell.is_empty());
        assert!(cell.version().is_none());

        let first = Arc::new(PolicySnapshot::new("v1", Utc::now(), Vec::new(), Value::Null));
        assert!(cell.replace(first.clone()).is_none());
        assert_eq!(cell.version().as_deref(), Some("v1"));

        let second = Arc::new(PolicySnapshot::new("v2", Utc::now(), Vec::new(), Value::Null));
        let previous = cell.replace(second).unwrap();
        assert!(Arc::ptr_eq(&previous, &first));

        // a reader holding the old snapshot keeps it intact
        assert_eq!(first.version, "v1");
        assert_eq!(cell.load().unwrap().version, "v2");
    }
}
