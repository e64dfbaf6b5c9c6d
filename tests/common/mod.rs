//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use policy_sync::cluster::{
    ClusterMember, CoordinationLedger, DistributedCoordinator, NodeTransport, StaticMembership,
};
use policy_sync::config::{DistributedConfig, SyncConfig};
use policy_sync::snapshot::{Policy, PolicyEffect, PolicySnapshot, SnapshotStore, SourceMetadata};
use policy_sync::source::PolicySource;
use policy_sync::sync::{AuthorizationEngine, PolicySynchronizer, SyncDependencies};
use policy_sync::{Error, Result};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn snapshot(version: &str, ids: &[&str], last_modified: DateTime<Utc>) -> PolicySnapshot {
    let policies = ids
        .iter()
        .map(|id| {
            Policy::new(
                *id,
                format!("permit(principal == User::\"{}\", action, resource);", id),
                PolicyEffect::Permit,
            )
        })
        .collect();
    PolicySnapshot::new(version, last_modified, policies, json!({"entityTypes": ["User"]}))
}

/// Policy source serving whatever snapshot is currently published to it
#[derive(Default)]
pub struct ScriptedSource {
    current: Mutex<Option<PolicySnapshot>>,
    offline: Mutex<bool>,
    delay: Mutex<Duration>,
    pub snapshot_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn serving(snapshot: PolicySnapshot) -> Arc<Self> {
        let source = Arc::new(ScriptedSource::default());
        source.publish(snapshot);
        source
    }

    pub fn publish(&self, snapshot: PolicySnapshot) {
        *self.current.lock() = Some(snapshot);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    async fn call<T>(&self, f: impl FnOnce(&PolicySnapshot) -> T) -> Result<T> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if *self.offline.lock() {
            return Err(Error::SourceStatus {
                status: 503,
                url: "http://policy-source/unavailable".to_string(),
            });
        }
        match self.current.lock().as_ref() {
            Some(snapshot) => Ok(f(snapshot)),
            None => Err(Error::SourceStatus {
                status: 404,
                url: "http://policy-source/missing".to_string(),
            }),
        }
    }
}

#[async_trait]
impl PolicySource for ScriptedSource {
    async fn fetch_metadata(&self, _store_id: &str) -> Result<SourceMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.call(|s| SourceMetadata {
            version: s.version.clone(),
            last_modified: s.last_modified,
            policy_count: s.policy_count(),
            checksum: s.checksum(),
        })
        .await
    }

    async fn fetch_snapshot(&self, _store_id: &str) -> Result<PolicySnapshot> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        self.call(|s| s.clone()).await
    }
}

/// Transport that fails a configurable set of nodes
#[derive(Default)]
pub struct FlakyTransport {
    failing: Mutex<HashSet<String>>,
    pub pushed: Mutex<Vec<(String, String)>>,
}

impl FlakyTransport {
    pub fn fail(&self, node_id: &str) {
        self.failing.lock().insert(node_id.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    pub fn versions_pushed_to(&self, node_id: &str) -> Vec<String> {
        self.pushed
            .lock()
            .iter()
            .filter(|(node, _)| node == node_id)
            .map(|(_, version)| version.clone())
            .collect()
    }
}

#[async_trait]
impl NodeTransport for FlakyTransport {
    async fn check_compatibility(&self, _node_id: &str, snapshot: &PolicySnapshot) -> Result<()> {
        snapshot.validate()
    }

    async fn push_snapshot(&self, node_id: &str, snapshot: Arc<PolicySnapshot>) -> Result<()> {
        if self.failing.lock().contains(node_id) {
            return Err(Error::NodeUpdate {
                node: node_id.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        self.pushed
            .lock()
            .push((node_id.to_string(), snapshot.version.clone()));
        Ok(())
    }
}

/// Engine hook counting invalidations
#[derive(Default)]
pub struct CountingEngine {
    pub invalidations: Mutex<Vec<(Option<String>, String)>>,
}

impl AuthorizationEngine for CountingEngine {
    fn invalidate_cache(&self, previous_version: Option<&str>, snapshot: &PolicySnapshot) {
        self.invalidations
            .lock()
            .push((previous_version.map(str::to_string), snapshot.version.clone()));
    }
}

pub fn fast_distributed() -> DistributedConfig {
    DistributedConfig {
        leader_timeout_ms: 200,
        coordination_timeout_ms: 300,
        follower_poll_interval_ms: 10,
        node_update_timeout_ms: 200,
        ..DistributedConfig::default()
    }
}

/// Static synchronizer settings: no adaptive selection, no cache
pub fn sync_config(strategy: policy_sync::strategy::SyncStrategy) -> SyncConfig {
    SyncConfig {
        strategy,
        adaptive_strategy: false,
        snapshot_cache: false,
        distributed: fast_distributed(),
        ..SyncConfig::default()
    }
}

/// One cluster node: its synchronizer plus the coordinator behind it
pub struct TestNode {
    pub synchronizer: PolicySynchronizer,
    pub coordinator: Arc<DistributedCoordinator>,
    pub membership: Arc<StaticMembership>,
}

pub struct NodeBuilder {
    pub local: String,
    pub members: Vec<String>,
    pub config: SyncConfig,
    pub source: Arc<dyn PolicySource>,
    pub transport: Arc<dyn NodeTransport>,
    pub ledger: Arc<dyn CoordinationLedger>,
    pub engine: Option<Arc<dyn AuthorizationEngine>>,
    pub cache: Option<SnapshotStore>,
}

impl NodeBuilder {
    pub fn build(self) -> TestNode {
        let members = self.members.iter().map(|id| ClusterMember::data(id.clone())).collect();
        let membership = Arc::new(StaticMembership::new(self.local, members, None));
        let coordinator = Arc::new(DistributedCoordinator::new(
            self.config.distributed.clone(),
            membership.clone(),
            self.transport,
            self.ledger,
        ));
        let synchronizer = PolicySynchronizer::new(
            self.config,
            "store-1",
            SyncDependencies {
                source: self.source,
                coordinator: coordinator.clone(),
                engine: self.engine,
                cache: self.cache,
            },
        );
        TestNode {
            synchronizer,
            coordinator,
            membership,
        }
    }
}
