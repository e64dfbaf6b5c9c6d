//! Configuration management for policy-sync

use crate::conflict::{MergeTieBreak, ResolutionPolicy};
use crate::error::{Error, Result};
use crate::strategy::SyncStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default interval between scheduled sync attempts
pub const DEFAULT_INTERVAL_SECONDS: u64 = 30;

/// Default staleness failsafe: one hour without a successful sync
pub const DEFAULT_STALENESS_THRESHOLD_SECS: u64 = 3600;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of the local node
    pub node: NodeConfig,

    /// Policy source connection
    pub source: SourceConfig,

    /// Synchronizer behaviour
    pub sync: SyncConfig,

    /// Static cluster membership
    pub cluster: ClusterConfig,

    /// Log output
    pub logging: LoggingConfig,
}

/// Local node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node id, defaults to the host name
    pub node_id: String,

    /// Directory holding the snapshot cache
    pub data_dir: PathBuf,
}

/// Policy source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the policy source
    pub endpoint: String,

    /// Policy store to synchronize
    pub policy_store_id: String,

    /// Per-request timeout (ms)
    pub request_timeout_ms: u64,
}

/// Synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Enable periodic synchronization
    pub enabled: bool,

    /// Delay between scheduled attempts (seconds)
    pub interval_seconds: u64,

    /// Configured fetch strategy
    pub strategy: SyncStrategy,

    /// Conflict resolution policy
    pub conflict_resolution: ResolutionPolicy,

    /// Pick the strategy per attempt and downgrade on failures
    pub adaptive_strategy: bool,

    /// Force a full fetch when the last success is older than this (seconds)
    pub staleness_threshold_secs: u64,

    /// Which side wins a merge when a policy lacks `updated_at`
    pub merge_tie_break: MergeTieBreak,

    /// Persist the last applied snapshot under `node.data_dir`
    pub snapshot_cache: bool,

    /// Cluster-wide coordination
    pub distributed: DistributedConfig,
}

/// Distributed coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedConfig {
    /// Roll changes out across the cluster
    pub enabled: bool,

    /// How long the leader waits for the coordination token (ms)
    pub leader_timeout_ms: u64,

    /// How long a follower waits for the leader's round (ms)
    pub coordination_timeout_ms: u64,

    /// Upper bound on phase 1 of a rollout
    pub max_concurrent_nodes: usize,

    /// Follower polling interval (ms)
    pub follower_poll_interval_ms: u64,

    /// Per-node update timeout (ms)
    pub node_update_timeout_ms: u64,
}

/// Static cluster membership
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Members of the cluster; empty means the local node only
    pub nodes: Vec<ClusterNodeConfig>,

    /// Externally designated master, if any
    pub master: Option<String>,
}

/// One statically configured cluster member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterNodeConfig {
    pub id: String,

    /// Whether the node holds policy data and takes part in rollouts
    #[serde(default = "default_true")]
    pub data_node: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive, overridden by RUST_LOG
    pub filter: String,
}

fn default_true() -> bool {
    true
}

/// Normalize an enumeration token so `Timestamp_Based` and `timestamp-based`
/// parse the same way
pub(crate) fn normalize_enum_token(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace('_', "-")
}

impl Default for NodeConfig {
    fn default() -> Self {
        let node_id = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());

        NodeConfig {
            node_id,
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("policy-sync"),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            endpoint: "http://localhost:8180".to_string(),
            policy_store_id: String::new(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            enabled: true,
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            strategy: SyncStrategy::Smart,
            conflict_resolution: ResolutionPolicy::TimestampBased,
            adaptive_strategy: true,
            staleness_threshold_secs: DEFAULT_STALENESS_THRESHOLD_SECS,
            merge_tie_break: MergeTieBreak::PreferRemote,
            snapshot_cache: true,
            distributed: DistributedConfig::default(),
        }
    }
}

impl Default for DistributedConfig {
    fn default() -> Self {
        DistributedConfig {
            enabled: true,
            leader_timeout_ms: 30_000,
            coordination_timeout_ms: 60_000,
            max_concurrent_nodes: 3,
            follower_poll_interval_ms: 1_000,
            node_update_timeout_ms: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON or YAML file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = if is_yaml(path) {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse config file: {}", e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse config file: {}", e))
            })?
        };

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("POLICY_SYNC_ENDPOINT") {
            let endpoint = endpoint.trim().to_string();
            if !endpoint.is_empty() {
                self.source.endpoint = endpoint;
            }
        }

        if let Ok(store_id) = std::env::var("POLICY_SYNC_STORE_ID") {
            let store_id = store_id.trim().to_string();
            if !store_id.is_empty() {
                self.source.policy_store_id = store_id;
            }
        }

        if let Ok(node_id) = std::env::var("POLICY_SYNC_NODE_ID") {
            let node_id = node_id.trim().to_string();
            if !node_id.is_empty() {
                self.node.node_id = node_id;
            }
        }

        if let Ok(interval) = std::env::var("POLICY_SYNC_INTERVAL_SECONDS") {
            if let Ok(secs) = interval.trim().parse::<u64>() {
                self.sync.interval_seconds = secs;
            }
        }

        if let Ok(strategy) = std::env::var("POLICY_SYNC_STRATEGY") {
            if let Ok(strategy) = strategy.parse::<SyncStrategy>() {
                self.sync.strategy = strategy;
            }
        }
    }

    /// Save configuration to a file as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config: {}", e))
            })?
        };

        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.node.node_id.trim().is_empty() {
            return Err(Error::InvalidConfig("Node id is required".to_string()));
        }

        if self.sync.interval_seconds == 0 {
            return Err(Error::InvalidConfig(
                "Sync interval must be greater than 0".to_string(),
            ));
        }

        if self.sync.enabled {
            if self.source.endpoint.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "Policy source endpoint is required when sync is enabled".to_string(),
                ));
            }
            if self.source.policy_store_id.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "Policy store id is required when sync is enabled".to_string(),
                ));
            }
        }

        if self.sync.staleness_threshold_secs < self.sync.interval_seconds {
            return Err(Error::InvalidConfig(
                "Staleness threshold must not be shorter than the sync interval".to_string(),
            ));
        }

        let distributed = &self.sync.distributed;
        if distributed.max_concurrent_nodes == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_nodes must be greater than 0".to_string(),
            ));
        }

        if distributed.coordination_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "Coordination timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.node.data_dir)?;
        Ok(())
    }

    /// Location of the sled snapshot cache
    pub fn snapshot_cache_path(&self) -> PathBuf {
        self.node.data_dir.join("snapshot-cache")
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.node.node_id = "node-a".to_string();
        config.source.policy_store_id = "store-1".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.sync.enabled);
        assert_eq!(config.sync.interval_seconds, 30);
        assert_eq!(config.sync.strategy, SyncStrategy::Smart);
        assert_eq!(config.sync.conflict_resolution, ResolutionPolicy::TimestampBased);
        assert!(config.sync.adaptive_strategy);
        assert!(config.sync.distributed.enabled);
        assert_eq!(config.sync.distributed.leader_timeout_ms, 30_000);
        assert_eq!(config.sync.distributed.coordination_timeout_ms, 60_000);
        assert_eq!(config.sync.distributed.max_concurrent_nodes, 3);
        assert!(!config.node.node_id.is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(valid_config().validate().is_ok());

        // store id missing
        assert!(Config::default().validate().is_err());

        let mut config = valid_config();
        config.sync.interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sync.distributed.max_concurrent_nodes = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sync.staleness_threshold_secs = 10;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sync.enabled = false;
        config.source.policy_store_id.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = valid_config();
        config.sync.strategy = SyncStrategy::Hybrid;
        config.sync.conflict_resolution = ResolutionPolicy::MergePolicies;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.source.policy_store_id, "store-1");
        assert_eq!(loaded.sync.conflict_resolution, ResolutionPolicy::MergePolicies);
    }

    #[test]
    fn test_load_yaml_with_partial_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
node:
  node_id: node-b
source:
  endpoint: http://policies.internal:8180
  policy_store_id: store-9
sync:
  interval_seconds: 45
  strategy: event
  conflict_resolution: merge_policies
  distributed:
    max_concurrent_nodes: 5
cluster:
  master: node-a
  nodes:
    - id: node-a
    - id: node-b
    - id: gateway
      data_node: false
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.node.node_id, "node-b");
        assert_eq!(config.sync.interval_seconds, 45);
        assert_eq!(config.sync.strategy, SyncStrategy::EventDriven);
        assert_eq!(config.sync.conflict_resolution, ResolutionPolicy::MergePolicies);
        assert_eq!(config.sync.distributed.max_concurrent_nodes, 5);
        // unspecified keys keep their defaults
        assert_eq!(config.sync.distributed.coordination_timeout_ms, 60_000);
        assert!(config.sync.adaptive_strategy);
        assert_eq!(config.cluster.master.as_deref(), Some("node-a"));
        assert_eq!(config.cluster.nodes.len(), 3);
        assert!(!config.cluster.nodes[2].data_node);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/policy-sync.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_normalize_enum_token() {
        assert_eq!(normalize_enum_token(" Timestamp_Based "), "timestamp-based");
        assert_eq!(normalize_enum_token("remote-wins"), "remote-wins");
    }
}
