use crate::error::{Error, Result};
use crate::snapshot::PolicySnapshot;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Delivers snapshots to other cluster members
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Check that `node_id` can accept `snapshot`
    async fn check_compatibility(&self, node_id: &str, snapshot: &PolicySnapshot) -> Result<()>;

    /// Install `snapshot` on `node_id`
    async fn push_snapshot(&self, node_id: &str, snapshot: Arc<PolicySnapshot>) -> Result<()>;
}

/// In-process transport that records which version each node was given.
/// Used for single-node deployments, where there is nobody else to push to.
#[derive(Default)]
pub struct LoopbackTransport {
    applied: DashMap<String, String>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version last pushed to `node_id`
    pub fn applied_version(&self, node_id: &str) -> Option<String> {
        self.applied.get(node_id).map(|v| v.value().clone())
    }
}

#[async_trait]
impl NodeTransport for LoopbackTransport {
    async fn check_compatibility(&self, node_id: &str, snapshot: &PolicySnapshot) -> Result<()> {
        snapshot.validate().map_err(|e| Error::NodeUpdate {
            node: node_id.to_string(),
            reason: e.to_string(),
        })
    }

    async fn push_snapshot(&self, node_id: &str, snapshot: Arc<PolicySnapshot>) -> Result<()> {
        debug!("Loopback push of {} to {}", snapshot.version, node_id);
        self.applied
            .insert(node_id.to_string(), snapshot.version.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    #[tokio::test]
    async fn test_loopback_records_pushes() {
        let transport = LoopbackTransport::new();
        let snapshot = Arc::new(PolicySnapshot::new("v3", Utc::now(), Vec::new(), Value::Null));

        transport.check_compatibility("n1", &snapshot).await.unwrap();
        transport.push_snapshot("n1", snapshot).await.unwrap();

        assert_eq!(transport.applied_version("n1").as_deref(), Some("v3"));
        assert!(transport.applied_version("n2").is_none());
    }
}
