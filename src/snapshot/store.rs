use super::PolicySnapshot;
use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// On-disk cache of the last applied snapshot
pub struct SnapshotStore {
    db: sled::Tree,
}

impl SnapshotStore {
    const CURRENT_KEY: &'static [u8] = b"current_snapshot";

    /// Open (or create) the cache database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        Self::new(db)
    }

    /// Create a store on an already opened database
    pub fn new(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree("snapshots")?;
        Ok(Self { db: tree })
    }

    /// Load the cached snapshot
    pub fn load(&self) -> Result<Option<PolicySnapshot>> {
        match self.db.get(Self::CURRENT_KEY)? {
            Some(bytes) => {
                let snapshot: PolicySnapshot = serde_json::from_slice(&bytes)?;
                snapshot.validate()?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Persist `snapshot` as the current one
    pub fn save(&self, snapshot: &PolicySnapshot) -> Result<()> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.db.insert(Self::CURRENT_KEY, bytes)?;
        self.db.flush()?;
        debug!("Cached snapshot {} ({} policies)", snapshot.version, snapshot.policy_count());
        Ok(())
    }

    /// Drop the cached snapshot
    pub fn clear(&self) -> Result<()> {
        self.db.remove(Self::CURRENT_KEY)?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Policy, PolicyEffect};
    use chrono::Utc;
    use serde_json::json;

    fn temp_store() -> SnapshotStore {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("Failed to open database");
        SnapshotStore::new(db).expect("Failed to create store")
    }

    #[test]
    fn test_save_and_load() {
        let store = temp_store();
        assert!(store.load().expect("Failed to load").is_none());

        let snapshot = PolicySnapshot::new(
            "v7",
            Utc::now(),
            vec![Policy::new("p1", "permit(principal, action, resource);", PolicyEffect::Permit)],
            json!({"entities": {}}),
        );
        store.save(&snapshot).expect("Failed to save");

        let loaded = store
            .load()
            .expect("Failed to load")
            .expect("Snapshot not found");
        assert_eq!(loaded, snapshot);

        store.clear().expect("Failed to clear");
        assert!(store.load().expect("Failed to load").is_none());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");

        {
            let store = SnapshotStore::open(&path).unwrap();
            store
                .save(&PolicySnapshot::new("v1", Utc::now(), Vec::new(), json!(null)))
                .unwrap();
        }

        let reopened = SnapshotStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap().unwrap().version, "v1");
    }
}
