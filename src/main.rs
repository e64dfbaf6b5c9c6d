//! policy-sync - Cluster-wide authorization policy synchronization
//!
//! Usage:
//!   policy-sync init --endpoint <url> --store-id <id>  - Write a default configuration
//!   policy-sync run                                    - Synchronize until interrupted
//!   policy-sync check                                  - Run a single sync attempt
//!   policy-sync status                                 - Show the cached snapshot and cluster view
//!   policy-sync recommend --policies <n>               - Suggest a sync strategy

use anyhow::Context;
use clap::{Parser, Subcommand};
use policy_sync::{
    cluster::{
        ClusterMembership, DistributedCoordinator, InMemoryLedger, LoopbackTransport,
        StaticMembership,
    },
    config::Config,
    snapshot::{PolicySnapshot, SnapshotStore},
    source::HttpPolicySource,
    strategy::SyncStrategy,
    sync::{AuthorizationEngine, PolicySynchronizer, SyncDependencies, SyncTrigger},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "policy-sync")]
#[command(author = "policy-sync Contributors")]
#[command(version)]
#[command(about = "Keeps an authorization policy snapshot synchronized across a cluster")]
struct Cli {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long, default_value = "~/.config/policy-sync/config.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Base URL of the policy source
        #[arg(long)]
        endpoint: String,

        /// Policy store to synchronize
        #[arg(long)]
        store_id: String,

        /// Node id (defaults to the host name)
        #[arg(long)]
        node_id: Option<String>,
    },

    /// Synchronize periodically until interrupted
    Run,

    /// Run one sync attempt and report the outcome
    Check {
        /// Override the configured strategy for this attempt
        #[arg(long)]
        strategy: Option<SyncStrategy>,
    },

    /// Show the cached snapshot and cluster view
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Suggest a strategy for a store of the given size
    Recommend {
        /// Number of policies in the store
        #[arg(long)]
        policies: usize,

        /// Observed change frequency (0.0 to 1.0)
        #[arg(long, default_value_t = 0.1)]
        change_frequency: f64,
    },
}

/// Engine hook for the standalone binary: there is no decision cache to drop,
/// so invalidations are only logged
struct LoggingEngine;

impl AuthorizationEngine for LoggingEngine {
    fn invalidate_cache(&self, previous_version: Option<&str>, snapshot: &PolicySnapshot) {
        info!(
            "Decision cache invalidated: {} -> {}",
            previous_version.unwrap_or("none"),
            snapshot.version
        );
    }
}

fn main() {
    let cli = Cli::parse();

    // Expand ~ in config path
    let config_path = expand_tilde(&cli.config);

    // Setup logging: RUST_LOG wins, then --verbose, then the configured filter
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        Config::load(&config_path)
            .map(|c| c.logging.filter)
            .unwrap_or_else(|_| "info".to_string())
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    // Run the command
    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Init {
            endpoint,
            store_id,
            node_id,
        } => cmd_init(config_path, endpoint, store_id, node_id),

        Commands::Run => cmd_run(config_path),

        Commands::Check { strategy } => cmd_check(config_path, strategy),

        Commands::Status { json } => cmd_status(config_path, json),

        Commands::Recommend {
            policies,
            change_frequency,
        } => cmd_recommend(policies, change_frequency),
    }
}

fn cmd_init(
    config_path: &Path,
    endpoint: String,
    store_id: String,
    node_id: Option<String>,
) -> anyhow::Result<()> {
    info!("Initializing policy-sync...");

    let mut config = Config::default();
    config.source.endpoint = endpoint;
    config.source.policy_store_id = store_id;
    if let Some(node_id) = node_id {
        config.node.node_id = node_id;
    }
    config.validate()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    config.save(config_path)?;
    config.ensure_directories()?;

    info!("Configuration saved to {:?}", config_path);
    info!("Node id: {}", config.node.node_id);
    info!("Data directory: {:?}", config.node.data_dir);
    info!("");
    info!("Next step: run 'policy-sync run' to start synchronizing");

    Ok(())
}

fn cmd_run(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;

    runtime.block_on(async {
        let synchronizer = build_synchronizer(&config)?;
        synchronizer.start();

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;

        info!("Shutting down...");
        synchronizer.stop();
        info!("{}", synchronizer.get_status().await.summary());
        Ok(())
    })
}

fn cmd_check(config_path: &Path, strategy: Option<SyncStrategy>) -> anyhow::Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(strategy) = strategy {
        config.sync.strategy = strategy;
        config.sync.adaptive_strategy = false;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    runtime.block_on(async {
        let synchronizer = build_synchronizer(&config)?;
        synchronizer.warm_start();

        let outcome = synchronizer.sync_now(SyncTrigger::Manual).await;
        let status = synchronizer.get_status().await;
        println!("{}", serde_json::to_string_pretty(&status)?);

        if outcome.is_success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Sync attempt did not succeed: {}", outcome))
        }
    })
}

fn cmd_status(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let status = runtime.block_on(async {
        let synchronizer = build_synchronizer(&config)?;
        synchronizer.warm_start();
        Ok::<_, anyhow::Error>(synchronizer.get_status().await)
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("policy-sync Status");
    println!("==================");
    println!();
    println!("Configuration: {:?}", config_path);
    println!("Node: {}", status.node_id);
    println!("Policy store: {}", status.policy_store_id);
    println!("Source: {}", config.source.endpoint);
    println!("Sync: {}", if status.enabled { "enabled" } else { "disabled" });
    println!(
        "Strategy: {}{}",
        status.configured_strategy,
        if status.adaptive_strategy { " (adaptive)" } else { "" }
    );
    println!("Conflict resolution: {}", status.conflict_resolution);
    println!(
        "Cached snapshot: {}",
        status.current_version.as_deref().unwrap_or("none")
    );
    println!("Policies: {}", status.policy_count);
    println!(
        "Distributed sync: {}",
        if status.cluster.distributed_enabled { "enabled" } else { "disabled" }
    );
    println!("Cluster members: {}", status.cluster.total_nodes);
    println!(
        "Leader: {}",
        status.cluster.leader_id.as_deref().unwrap_or("none")
    );
    for node in &status.cluster.nodes {
        println!(
            "  {} {} {}",
            node.node_id,
            node.status,
            node.version.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

fn cmd_recommend(policies: usize, frequency: f64) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&frequency) {
        anyhow::bail!("Change frequency must be between 0.0 and 1.0");
    }

    let strategy = SyncStrategy::recommend(policies, frequency);
    println!("Recommended strategy: {}", strategy);
    println!("{}", strategy.description());
    Ok(())
}

/// Wire the synchronizer for this process. The binary has no peer transport,
/// so every node syncs from the source on its own and cluster rollouts are
/// left to embedders that provide a transport and a shared ledger.
fn build_synchronizer(config: &Config) -> anyhow::Result<PolicySynchronizer> {
    config.ensure_directories()?;

    let membership = StaticMembership::from_config(config);
    let mut sync_config = config.sync.clone();
    let has_peers = membership
        .members()
        .iter()
        .any(|m| m.id != config.node.node_id);
    if sync_config.distributed.enabled && has_peers {
        warn!(
            "No peer transport available, node {} syncs without cluster coordination",
            config.node.node_id
        );
        sync_config.distributed.enabled = false;
    }

    let source = Arc::new(HttpPolicySource::from_config(&config.source)?);
    let coordinator = Arc::new(DistributedCoordinator::new(
        sync_config.distributed.clone(),
        Arc::new(membership),
        Arc::new(LoopbackTransport::new()),
        Arc::new(InMemoryLedger::new()),
    ));

    let cache = if config.sync.snapshot_cache {
        let path = config.snapshot_cache_path();
        Some(
            SnapshotStore::open(&path)
                .with_context(|| format!("Failed to open snapshot cache at {:?}", path))?,
        )
    } else {
        None
    };

    Ok(PolicySynchronizer::new(
        sync_config,
        config.source.policy_store_id.clone(),
        SyncDependencies {
            source,
            coordinator,
            engine: Some(Arc::new(LoggingEngine)),
            cache,
        },
    ))
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
