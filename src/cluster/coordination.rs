use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

/// Proof of holding the cluster's coordination lock for one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundToken {
    pub id: Uuid,
    pub holder: String,
    pub request_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Cluster-shared coordination state: the round lock and the last version
/// a leader rolled out
#[async_trait]
pub trait CoordinationLedger: Send + Sync {
    /// Take the round lock, `None` if someone else holds it
    async fn try_acquire(&self, holder: &str, request_id: &str) -> Result<Option<RoundToken>>;

    /// Release a lock taken with [`try_acquire`](Self::try_acquire). Stale tokens are ignored.
    async fn release(&self, token: &RoundToken) -> Result<()>;

    async fn publish_version(&self, version: &str) -> Result<()>;

    async fn published_version(&self) -> Result<Option<String>>;

    /// Whether other nodes see this ledger. Followers only wait on a
    /// leader's publish when it can reach them.
    fn is_shared(&self) -> bool {
        true
    }
}

/// Ledger held in memory
#[derive(Default)]
pub struct InMemoryLedger {
    token: Mutex<Option<RoundToken>>,
    version: RwLock<Option<String>>,
    shared: bool,
}

impl InMemoryLedger {
    /// Ledger private to one node
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger handed to several coordinators in the same process
    pub fn shared() -> Self {
        InMemoryLedger {
            shared: true,
            ..Self::default()
        }
    }

    pub fn holder(&self) -> Option<String> {
        self.token.lock().as_ref().map(|t| t.holder.clone())
    }
}

#[async_trait]
impl CoordinationLedger for InMemoryLedger {
    async fn try_acquire(&self, holder: &str, request_id: &str) -> Result<Option<RoundToken>> {
        let mut current = self.token.lock();
        if current.is_some() {
            return Ok(None);
        }

        let token = RoundToken {
            id: Uuid::new_v4(),
            holder: holder.to_string(),
            request_id: request_id.to_string(),
            acquired_at: Utc::now(),
        };
        *current = Some(token.clone());
        Ok(Some(token))
    }

    async fn release(&self, token: &RoundToken) -> Result<()> {
        let mut current = self.token.lock();
        if current.as_ref().map(|t| t.id) == Some(token.id) {
            *current = None;
        }
        Ok(())
    }

    async fn publish_version(&self, version: &str) -> Result<()> {
        *self.version.write() = Some(version.to_string());
        Ok(())
    }

    async fn published_version(&self) -> Result<Option<String>> {
        Ok(self.version.read().clone())
    }

    fn is_shared(&self) -> bool {
        self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_holder() {
        let ledger = InMemoryLedger::new();

        let token = ledger.try_acquire("n1", "req-1").await.unwrap().unwrap();
        assert!(ledger.try_acquire("n2", "req-2").await.unwrap().is_none());
        assert_eq!(ledger.holder().as_deref(), Some("n1"));

        ledger.release(&token).await.unwrap();
        assert!(ledger.holder().is_none());
        assert!(ledger.try_acquire("n2", "req-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_release_ignored() {
        let ledger = InMemoryLedger::new();
        let first = ledger.try_acquire("n1", "req-1").await.unwrap().unwrap();
        ledger.release(&first).await.unwrap();

        let _second = ledger.try_acquire("n2", "req-2").await.unwrap().unwrap();
        ledger.release(&first).await.unwrap();
        assert_eq!(ledger.holder().as_deref(), Some("n2"));
    }

    #[tokio::test]
    async fn test_published_version() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.published_version().await.unwrap().is_none());
        ledger.publish_version("v9").await.unwrap();
        assert_eq!(ledger.published_version().await.unwrap().as_deref(), Some("v9"));
    }

    #[test]
    fn test_sharing() {
        assert!(!InMemoryLedger::new().is_shared());
        assert!(InMemoryLedger::shared().is_shared());
    }
}
