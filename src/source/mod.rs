//! Policy source collaborator
//!
//! The synchronizer only needs two operations from the system that owns the
//! policies: a cheap metadata probe and a full snapshot download. Sources
//! that keep a change log may also serve the changes since a given version.

mod http;

pub use http::HttpPolicySource;

use crate::error::Result;
use crate::snapshot::{PolicyDelta, PolicySnapshot, SourceMetadata};
use async_trait::async_trait;

/// Where snapshots come from
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Version, modification time, policy count and checksum of the store
    async fn fetch_metadata(&self, store_id: &str) -> Result<SourceMetadata>;

    /// Complete snapshot of the store
    async fn fetch_snapshot(&self, store_id: &str) -> Result<PolicySnapshot>;

    /// Changes since `since_version`, or `None` when the source has no change feed
    async fn fetch_changes(
        &self,
        _store_id: &str,
        _since_version: &str,
    ) -> Result<Option<PolicyDelta>> {
        Ok(None)
    }
}
