use crate::strategy::SyncStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Why a sync attempt was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncTrigger {
    Scheduled,
    Manual,
    Startup,
    EventNotification,
    Webhook,
    Failover,
    Recovery,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Scheduled => "scheduled",
            SyncTrigger::Manual => "manual",
            SyncTrigger::Startup => "startup",
            SyncTrigger::EventNotification => "event-notification",
            SyncTrigger::Webhook => "webhook",
            SyncTrigger::Failover => "failover",
            SyncTrigger::Recovery => "recovery",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping for a single sync attempt. Only its summary outlives the attempt.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub node_id: String,
    pub request_id: String,
    pub strategy: SyncStrategy,
    pub trigger: SyncTrigger,
    pub attempt: u64,
    pub started_at: DateTime<Utc>,
    pub policies_processed: usize,
    pub conflicts_detected: usize,
    pub network_latency: Duration,
    pub is_leader: bool,
    started: Instant,
}

impl SyncContext {
    pub fn new(
        node_id: impl Into<String>,
        strategy: SyncStrategy,
        trigger: SyncTrigger,
        attempt: u64,
        is_leader: bool,
    ) -> Self {
        let node_id = node_id.into();
        let started_at = Utc::now();
        let request_id = format!(
            "sync-{}-{}-{}",
            node_id,
            started_at.timestamp_millis(),
            attempt
        );

        SyncContext {
            node_id,
            request_id,
            strategy,
            trigger,
            attempt,
            started_at,
            policies_processed: 0,
            conflicts_detected: 0,
            network_latency: Duration::ZERO,
            is_leader,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Add time spent waiting on the policy source
    pub fn record_latency(&mut self, latency: Duration) {
        self.network_latency += latency;
    }

    pub fn summary(&self) -> String {
        format!(
            "{} [strategy={}, trigger={}, attempt={}, elapsed={}ms, latency={}ms, policies={}, conflicts={}, leader={}]",
            self.request_id,
            self.strategy,
            self.trigger,
            self.attempt,
            self.elapsed().as_millis(),
            self.network_latency.as_millis(),
            self.policies_processed,
            self.conflicts_detected,
            self.is_leader
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id() {
        let ctx = SyncContext::new("node-a", SyncStrategy::Smart, SyncTrigger::Manual, 7, true);
        assert!(ctx.request_id.starts_with("sync-node-a-"));
        assert!(ctx.request_id.ends_with("-7"));
    }

    #[test]
    fn test_summary() {
        let mut ctx = SyncContext::new("node-a", SyncStrategy::Full, SyncTrigger::Startup, 1, false);
        ctx.policies_processed = 12;
        ctx.conflicts_detected = 2;
        ctx.record_latency(Duration::from_millis(30));
        ctx.record_latency(Duration::from_millis(12));
        assert_eq!(ctx.network_latency, Duration::from_millis(42));

        let summary = ctx.summary();
        assert!(summary.contains("strategy=full"));
        assert!(summary.contains("trigger=startup"));
        assert!(summary.contains("policies=12"));
        assert!(summary.contains("conflicts=2"));
    }
}
