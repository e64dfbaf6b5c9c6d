//! Periodic policy synchronizer

use super::context::{SyncContext, SyncTrigger};
use super::engine::{AuthorizationEngine, PolicyChange};
use super::status::{AttemptPhase, SyncOutcome, SynchronizerStatus};
use crate::cluster::{CoordinationResult, DistributedCoordinator};
use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, ConflictType, ResolutionAction};
use crate::error::{Error, Result};
use crate::snapshot::{PolicySnapshot, SnapshotCell, SnapshotStore, SourceMetadata};
use crate::source::PolicySource;
use crate::strategy::{change_frequency, smart_needs_full, SyncStrategy, DOWNGRADE_AFTER_FAILURES};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collaborators the synchronizer drives
pub struct SyncDependencies {
    pub source: Arc<dyn PolicySource>,
    pub coordinator: Arc<DistributedCoordinator>,
    /// Notified after every apply that changed the snapshot
    pub engine: Option<Arc<dyn AuthorizationEngine>>,
    /// Persists applied snapshots for warm starts
    pub cache: Option<SnapshotStore>,
}

/// Mutable synchronizer state, guarded as a unit
#[derive(Debug)]
struct SyncState {
    last_known_version: Option<String>,
    last_successful_sync: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    active_strategy: SyncStrategy,
    phase: AttemptPhase,
    last_outcome: Option<SyncOutcome>,
    last_error: Option<String>,
    unresolved_conflicts: Vec<ConflictType>,
    successful_attempts: u64,
}

/// What a fetch produced
enum FetchResult {
    /// The source has nothing newer than the local snapshot
    Unchanged,
    Snapshot(PolicySnapshot),
}

struct Inner {
    config: SyncConfig,
    policy_store_id: String,
    node_id: String,
    source: Arc<dyn PolicySource>,
    coordinator: Arc<DistributedCoordinator>,
    engine: Option<Arc<dyn AuthorizationEngine>>,
    cache: Option<SnapshotStore>,
    resolver: ConflictResolver,
    current: SnapshotCell,
    state: RwLock<SyncState>,
    attempt_lock: tokio::sync::Mutex<()>,
    attempts: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps the local policy snapshot in step with the policy source and,
/// through the coordinator, with the rest of the cluster.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct PolicySynchronizer {
    inner: Arc<Inner>,
}

impl PolicySynchronizer {
    pub fn new(config: SyncConfig, policy_store_id: impl Into<String>, deps: SyncDependencies) -> Self {
        let state = SyncState {
            last_known_version: None,
            last_successful_sync: None,
            last_attempt: None,
            consecutive_failures: 0,
            active_strategy: config.strategy,
            phase: AttemptPhase::Idle,
            last_outcome: None,
            last_error: None,
            unresolved_conflicts: Vec::new(),
            successful_attempts: 0,
        };

        let inner = Inner {
            resolver: ConflictResolver::new(config.conflict_resolution, config.merge_tie_break),
            node_id: deps.coordinator.local_node_id(),
            policy_store_id: policy_store_id.into(),
            source: deps.source,
            coordinator: deps.coordinator,
            engine: deps.engine,
            cache: deps.cache,
            current: SnapshotCell::empty(),
            state: RwLock::new(state),
            attempt_lock: tokio::sync::Mutex::new(()),
            attempts: AtomicU64::new(0),
            timer: Mutex::new(None),
            config,
        };

        PolicySynchronizer {
            inner: Arc::new(inner),
        }
    }

    /// Begin periodic synchronization. The first attempt runs immediately.
    /// Calling this while already running does nothing.
    pub fn start(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Policy synchronizer already running");
            return;
        }

        if !self.inner.config.enabled {
            info!("Policy synchronization is disabled");
            return;
        }

        self.inner.load_cached_snapshot();

        let interval = Duration::from_secs(self.inner.config.interval_seconds);
        info!(
            "Starting policy synchronizer for store {} on node {} (interval {:?}, strategy {})",
            self.inner.policy_store_id, self.inner.node_id, interval, self.inner.config.strategy
        );

        let inner = Arc::clone(&self.inner);
        *timer = Some(tokio::spawn(async move {
            let mut trigger = SyncTrigger::Startup;
            loop {
                // each attempt runs on its own task so stop() never cuts one short
                let attempt_inner = Arc::clone(&inner);
                let attempt = tokio::spawn(async move { attempt_inner.run_attempt(trigger).await });
                if let Err(e) = attempt.await {
                    error!("Sync attempt task failed: {}", e);
                }

                tokio::time::sleep(interval).await;
                trigger = SyncTrigger::Scheduled;
            }
        }));
    }

    /// Cancel future scheduled attempts. An attempt already running completes.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
            info!("Policy synchronizer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Run an attempt on its own task; resolves to whether the applied
    /// snapshot changed
    pub fn force_sync_check(&self) -> JoinHandle<bool> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_attempt(SyncTrigger::Manual).await.changed() })
    }

    /// Run an attempt and wait for it
    pub async fn sync_now(&self, trigger: SyncTrigger) -> SyncOutcome {
        self.inner.run_attempt(trigger).await
    }

    /// Roll the currently applied snapshot out to the cluster right away
    pub async fn force_cluster_sync(&self) -> Result<CoordinationResult> {
        let snapshot = self.inner.current.load().ok_or(Error::NoSnapshot)?;
        let _guard = self.inner.attempt_lock.lock().await;

        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = SyncContext::new(
            self.inner.node_id.clone(),
            self.inner.active_strategy(),
            SyncTrigger::Manual,
            attempt,
            self.inner.coordinator.is_local_leader(),
        );
        info!("Forcing cluster rollout of {} ({})", snapshot.version, ctx.request_id);

        let result = self
            .inner
            .coordinator
            .force_rollout(snapshot, &ctx.request_id)
            .await;
        Ok(result)
    }

    /// Snapshot currently used for decisions
    pub fn get_current_snapshot(&self) -> Option<Arc<PolicySnapshot>> {
        self.inner.current.load()
    }

    /// Conflicts left for manual review by the last attempt
    pub fn last_conflicts(&self) -> Vec<ConflictType> {
        self.inner.state.read().unresolved_conflicts.clone()
    }

    pub fn active_strategy(&self) -> SyncStrategy {
        self.inner.active_strategy()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.state.read().consecutive_failures
    }

    /// Load the cached snapshot, if any, without contacting the source
    pub fn warm_start(&self) -> bool {
        self.inner.load_cached_snapshot()
    }

    pub async fn get_status(&self) -> SynchronizerStatus {
        let inner = &self.inner;
        let cluster = inner.coordinator.cluster_view().await;
        let current = inner.current.load();
        let running = self.is_running();
        let state = inner.state.read();

        SynchronizerStatus {
            enabled: inner.config.enabled,
            running,
            node_id: inner.node_id.clone(),
            policy_store_id: inner.policy_store_id.clone(),
            configured_strategy: inner.config.strategy,
            active_strategy: state.active_strategy,
            adaptive_strategy: inner.config.adaptive_strategy,
            conflict_resolution: inner.resolver.policy(),
            current_version: current.as_ref().map(|s| s.version.clone()),
            policy_count: current.as_ref().map_or(0, |s| s.policy_count()),
            checksum: current.as_ref().map(|s| s.checksum()),
            last_known_version: state.last_known_version.clone(),
            last_successful_sync: state.last_successful_sync,
            last_attempt: state.last_attempt,
            consecutive_failures: state.consecutive_failures,
            total_attempts: inner.attempts.load(Ordering::SeqCst),
            successful_attempts: state.successful_attempts,
            phase: state.phase,
            last_outcome: state.last_outcome.clone(),
            last_error: state.last_error.clone(),
            unresolved_conflicts: state.unresolved_conflicts.clone(),
            cluster,
        }
    }
}

impl Inner {
    fn active_strategy(&self) -> SyncStrategy {
        self.state.read().active_strategy
    }

    fn set_phase(&self, phase: AttemptPhase) {
        self.state.write().phase = phase;
    }

    fn load_cached_snapshot(&self) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        if !self.current.is_empty() {
            return false;
        }

        match cache.load() {
            Ok(Some(snapshot)) => {
                info!(
                    "Loaded cached snapshot {} with {} policies",
                    snapshot.version,
                    snapshot.policy_count()
                );
                self.state.write().last_known_version = Some(snapshot.version.clone());
                self.current.replace(Arc::new(snapshot));
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to load cached snapshot: {}", e);
                false
            }
        }
    }

    /// Strategy for the next attempt
    fn effective_strategy(&self, now: DateTime<Utc>) -> SyncStrategy {
        let state = self.state.read();

        if let Some(last) = state.last_successful_sync {
            let stale_after = chrono::Duration::seconds(self.config.staleness_threshold_secs as i64);
            if now - last > stale_after {
                return SyncStrategy::Full;
            }
        }

        if self.config.adaptive_strategy && state.consecutive_failures == 0 {
            let local_count = self.current.load().map_or(0, |s| s.policy_count());
            let frequency = change_frequency(0, state.last_successful_sync, now);
            return SyncStrategy::recommend(local_count, frequency);
        }

        state.active_strategy
    }

    async fn run_attempt(&self, trigger: SyncTrigger) -> SyncOutcome {
        let _guard = self.attempt_lock.lock().await;

        let now = Utc::now();
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let strategy = self.effective_strategy(now);
        let mut ctx = SyncContext::new(
            self.node_id.clone(),
            strategy,
            trigger,
            attempt,
            self.coordinator.is_local_leader(),
        );
        self.state.write().last_attempt = Some(now);
        debug!("Starting sync attempt {}", ctx.request_id);

        let outcome = self.attempt(&mut ctx).await;

        {
            let mut state = self.state.write();
            state.phase = AttemptPhase::Idle;
            if outcome.is_success() {
                state.successful_attempts += 1;
            }
            if let Some(error) = outcome.error() {
                state.last_error = Some(error.to_string());
            }
            state.last_outcome = Some(outcome.clone());
        }

        if outcome.is_success() {
            info!("Sync {}: {}", outcome, ctx.summary());
        } else {
            warn!("Sync {}: {}", outcome, ctx.summary());
        }
        outcome
    }

    async fn attempt(&self, ctx: &mut SyncContext) -> SyncOutcome {
        self.set_phase(AttemptPhase::Fetching);
        let fetched = match self.fetch(ctx).await {
            Ok(fetched) => fetched,
            Err(e) => return self.record_fetch_failure(&e),
        };

        let remote = match fetched {
            FetchResult::Unchanged => {
                let version = self.current.version();
                self.record_success(version.clone(), ctx);
                return SyncOutcome::Unchanged { version };
            }
            FetchResult::Snapshot(snapshot) => Arc::new(snapshot),
        };
        ctx.policies_processed = remote.policy_count();

        self.set_phase(AttemptPhase::ConflictCheck);
        let local = self.current.load();
        let resolution = self.resolver.resolve(local.as_deref(), remote);
        ctx.conflicts_detected = resolution.conflicts.len();

        match resolution.action {
            ResolutionAction::NeedsManualReview => {
                warn!(
                    "Conflicts need manual review, keeping local snapshot: {}",
                    resolution.conflicts
                );
                self.state.write().unresolved_conflicts = resolution.unresolved;
                return SyncOutcome::NeedsManualReview {
                    reason: resolution.reason,
                };
            }
            ResolutionAction::Abort => {
                self.state.write().unresolved_conflicts = resolution.unresolved;
                return SyncOutcome::Aborted {
                    reason: resolution.reason,
                };
            }
            ResolutionAction::KeepLocal => {
                debug!("Keeping local snapshot: {}", resolution.reason);
                self.record_success(local.as_ref().map(|s| s.version.clone()), ctx);
                return SyncOutcome::KeptLocal {
                    reason: resolution.reason,
                };
            }
            ResolutionAction::AcceptRemote | ResolutionAction::AcceptMerged => {}
        }

        let Some(resolved) = resolution.snapshot else {
            return SyncOutcome::Aborted {
                reason: format!("{} produced no snapshot", resolution.action),
            };
        };
        self.set_phase(AttemptPhase::Resolved);

        let significant = match &local {
            Some(local) => {
                local.version != resolved.version || local.policy_count() != resolved.policy_count()
            }
            None => true,
        };

        // leaders roll out; followers only wait when they share the leader's ledger
        let coordinate = ctx.is_leader || self.coordinator.followers_wait();
        if significant && self.coordinator.is_enabled() && coordinate {
            self.set_phase(AttemptPhase::ClusterCoordination);
            let local_version = local.as_ref().map(|s| s.version.as_str());
            let result = self
                .coordinator
                .coordinate(Arc::clone(&resolved), local_version, &ctx.request_id)
                .await;
            if !result.successful {
                return SyncOutcome::CoordinationFailed {
                    reason: result.reason,
                };
            }
        }

        self.set_phase(AttemptPhase::Apply);
        self.apply(resolved, ctx)
    }

    /// Swap `snapshot` in and tell everyone who cares
    fn apply(&self, snapshot: Arc<PolicySnapshot>, ctx: &SyncContext) -> SyncOutcome {
        let previous = self.current.replace(Arc::clone(&snapshot));
        self.record_success(Some(snapshot.version.clone()), ctx);

        let changed = match &previous {
            Some(previous) => {
                previous.version != snapshot.version || !previous.same_content(&snapshot)
            }
            None => true,
        };

        if changed {
            let change = PolicyChange::between(previous.as_deref(), &snapshot);
            info!(
                "Applied policy snapshot {} ({} policies, {} added, {} removed)",
                snapshot.version,
                snapshot.policy_count(),
                change.added,
                change.removed
            );

            if let Some(engine) = &self.engine {
                engine.invalidate_cache(previous.as_ref().map(|s| s.version.as_str()), &snapshot);
            }

            if let Some(cache) = &self.cache {
                if let Err(e) = cache.save(&snapshot) {
                    warn!("Failed to cache snapshot {}: {}", snapshot.version, e);
                }
            }
        }

        SyncOutcome::Applied {
            version: snapshot.version.clone(),
            changed,
        }
    }

    fn record_success(&self, version: Option<String>, ctx: &SyncContext) {
        self.coordinator
            .record_local_sync(version.as_deref(), ctx.elapsed());

        let mut state = self.state.write();
        if version.is_some() {
            state.last_known_version = version;
        }
        state.last_successful_sync = Some(Utc::now());
        if state.consecutive_failures > 0 && self.config.adaptive_strategy {
            state.active_strategy = self.config.strategy;
        }
        state.consecutive_failures = 0;
        state.last_error = None;
        state.unresolved_conflicts.clear();
    }

    fn record_fetch_failure(&self, e: &Error) -> SyncOutcome {
        let mut state = self.state.write();
        state.consecutive_failures += 1;
        let failures = state.consecutive_failures;

        if self.config.adaptive_strategy && failures > DOWNGRADE_AFTER_FAILURES {
            let current = state.active_strategy;
            let downgraded = current.downgrade();
            if downgraded != current {
                warn!(
                    "Downgrading sync strategy from {} to {} after {} consecutive failures",
                    current, downgraded, failures
                );
                state.active_strategy = downgraded;
            }
        }
        drop(state);

        if !e.is_fetch_error() {
            debug!("Non-fetch error during fetch phase: {}", e);
        }
        SyncOutcome::FetchFailed {
            error: e.to_string(),
        }
    }

    async fn timed<T>(&self, ctx: &mut SyncContext, call: impl Future<Output = Result<T>>) -> Result<T> {
        let started = Instant::now();
        let result = call.await;
        ctx.record_latency(started.elapsed());
        result
    }

    async fn fetch(&self, ctx: &mut SyncContext) -> Result<FetchResult> {
        let local = self.current.load();

        match ctx.strategy {
            SyncStrategy::Full => self.fetch_full(ctx).await,
            SyncStrategy::Incremental => match local {
                Some(local) => {
                    let metadata = self.fetch_metadata(ctx).await?;
                    self.fetch_incremental(ctx, &metadata, &local).await
                }
                None => self.fetch_full(ctx).await,
            },
            SyncStrategy::Smart | SyncStrategy::Hybrid => match local {
                Some(local) => {
                    let metadata = self.fetch_metadata(ctx).await?;
                    if smart_needs_full(local.policy_count(), metadata.policy_count) {
                        debug!(
                            "Policy count moved from {} to {}, fetching full snapshot",
                            local.policy_count(),
                            metadata.policy_count
                        );
                        self.fetch_full(ctx).await
                    } else {
                        self.fetch_incremental(ctx, &metadata, &local).await
                    }
                }
                None => self.fetch_full(ctx).await,
            },
            SyncStrategy::EventDriven => {
                let metadata = self.fetch_metadata(ctx).await?;
                if self.update_needed(&metadata) {
                    self.fetch_full(ctx).await
                } else {
                    Ok(FetchResult::Unchanged)
                }
            }
        }
    }

    async fn fetch_metadata(&self, ctx: &mut SyncContext) -> Result<SourceMetadata> {
        self.timed(ctx, self.source.fetch_metadata(&self.policy_store_id))
            .await
    }

    async fn fetch_full(&self, ctx: &mut SyncContext) -> Result<FetchResult> {
        let snapshot = self
            .timed(ctx, self.source.fetch_snapshot(&self.policy_store_id))
            .await?;
        snapshot.validate()?;
        Ok(FetchResult::Snapshot(snapshot))
    }

    async fn fetch_incremental(
        &self,
        ctx: &mut SyncContext,
        metadata: &SourceMetadata,
        local: &PolicySnapshot,
    ) -> Result<FetchResult> {
        if metadata.version == local.version {
            return Ok(FetchResult::Unchanged);
        }

        let delta = self
            .timed(ctx, self.source.fetch_changes(&self.policy_store_id, &local.version))
            .await?;

        match delta {
            Some(delta) => match delta.apply_to(local) {
                Ok(snapshot) => Ok(FetchResult::Snapshot(snapshot)),
                Err(e) => {
                    debug!("Change set unusable ({}), fetching full snapshot", e);
                    self.fetch_full(ctx).await
                }
            },
            None => self.fetch_full(ctx).await,
        }
    }

    fn update_needed(&self, metadata: &SourceMetadata) -> bool {
        let state = self.state.read();
        let Some(known) = &state.last_known_version else {
            return true;
        };
        if *known != metadata.version {
            return true;
        }
        match state.last_successful_sync {
            Some(last) => {
                let stale_after = chrono::Duration::seconds(self.config.staleness_threshold_secs as i64);
                Utc::now() - last > stale_after
            }
            None => true,
        }
    }
}
