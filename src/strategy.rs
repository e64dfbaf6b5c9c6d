//! Fetch strategy selection
//!
//! The set of strategies is closed. Adaptive mode recommends one per attempt
//! from the local policy volume and the recent sync history, and steps down
//! the ladder after repeated fetch failures. Strategies never step back up on
//! their own.

use crate::config::normalize_enum_token;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local policy count below which a full fetch is always cheapest
pub const SMALL_STORE_THRESHOLD: usize = 100;

/// Local policy count above which incremental fetch pays off
pub const LARGE_STORE_THRESHOLD: usize = 1000;

/// Relative policy-count delta above which smart sync re-fetches everything
pub const FULL_SYNC_RATIO: f64 = 0.2;

/// Consecutive fetch failures tolerated before the strategy is downgraded
pub const DOWNGRADE_AFTER_FAILURES: u32 = 2;

/// How the synchronizer fetches the remote snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum SyncStrategy {
    /// Re-fetch the entire snapshot every attempt
    Full,
    /// Fetch only the changes since the last known version
    Incremental,
    /// Full or incremental, chosen by comparing policy counts
    Smart,
    /// Push driven; scheduled ticks only check metadata
    EventDriven,
    /// Event driven with smart fallback on scheduled ticks
    Hybrid,
}

impl SyncStrategy {
    pub const ALL: [SyncStrategy; 5] = [
        SyncStrategy::Full,
        SyncStrategy::Incremental,
        SyncStrategy::Smart,
        SyncStrategy::EventDriven,
        SyncStrategy::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::Full => "full",
            SyncStrategy::Incremental => "incremental",
            SyncStrategy::Smart => "smart",
            SyncStrategy::EventDriven => "event-driven",
            SyncStrategy::Hybrid => "hybrid",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SyncStrategy::Full => "Re-fetch the entire snapshot on every attempt",
            SyncStrategy::Incremental => "Fetch only policies changed since the last known version",
            SyncStrategy::Smart => "Choose full or incremental by comparing policy counts",
            SyncStrategy::EventDriven => "Follow push notifications, check metadata on schedule",
            SyncStrategy::Hybrid => "Event driven with periodic smart sync fallback",
        }
    }

    pub fn supports_incremental(&self) -> bool {
        matches!(
            self,
            SyncStrategy::Incremental | SyncStrategy::Smart | SyncStrategy::Hybrid
        )
    }

    pub fn supports_real_time(&self) -> bool {
        matches!(self, SyncStrategy::EventDriven | SyncStrategy::Hybrid)
    }

    /// Recommend a strategy for a store of `policy_count` policies changing
    /// at roughly `change_frequency` (0.0 to 1.0)
    pub fn recommend(policy_count: usize, change_frequency: f64) -> SyncStrategy {
        if policy_count < SMALL_STORE_THRESHOLD {
            SyncStrategy::Full
        } else if policy_count > LARGE_STORE_THRESHOLD && change_frequency < 0.1 {
            SyncStrategy::Incremental
        } else if change_frequency > 0.5 {
            SyncStrategy::EventDriven
        } else {
            SyncStrategy::Smart
        }
    }

    /// Next step down the ladder after repeated failures
    pub fn downgrade(&self) -> SyncStrategy {
        match self {
            SyncStrategy::Smart | SyncStrategy::Hybrid => SyncStrategy::Incremental,
            SyncStrategy::Incremental | SyncStrategy::EventDriven => SyncStrategy::Full,
            SyncStrategy::Full => SyncStrategy::Full,
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_enum_token(s).as_str() {
            "full" => Ok(SyncStrategy::Full),
            "incremental" => Ok(SyncStrategy::Incremental),
            "smart" => Ok(SyncStrategy::Smart),
            "event-driven" | "event" => Ok(SyncStrategy::EventDriven),
            "hybrid" => Ok(SyncStrategy::Hybrid),
            other => Err(format!("unknown sync strategy: {}", other)),
        }
    }
}

impl TryFrom<String> for SyncStrategy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Coarse change-frequency estimate from recent sync history.
///
/// Any active failure pins the estimate low so the recommendation favours
/// simpler strategies.
pub fn change_frequency(
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    if consecutive_failures > 0 {
        return 0.1;
    }

    match last_success {
        Some(at) => {
            let minutes = (now - at).num_minutes();
            if minutes < 5 {
                0.8
            } else if minutes < 30 {
                0.4
            } else {
                0.1
            }
        }
        None => 0.1,
    }
}

/// Whether smart sync should fall back to a full fetch
pub fn smart_needs_full(local_count: usize, remote_count: usize) -> bool {
    if local_count == 0 {
        return true;
    }
    let delta = local_count.abs_diff(remote_count) as f64;
    delta / local_count as f64 > FULL_SYNC_RATIO
}
