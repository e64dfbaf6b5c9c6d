//! Error types for policy-sync

use std::time::Duration;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the synchronizer, the policy source and the cluster coordinator
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Policy source request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Policy source returned status {status} for {url}")]
    SourceStatus { status: u16, url: String },

    #[error("Malformed policy source response: {0}")]
    MalformedResponse(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Policy merge failed: {0}")]
    Merge(String),

    #[error("Change set does not apply: {0}")]
    DeltaMismatch(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot cache error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Cluster coordination failed: {0}")]
    Coordination(String),

    #[error("Update of node {node} failed: {reason}")]
    NodeUpdate { node: String, reason: String },

    #[error("No policy snapshot available")]
    NoSnapshot,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error belongs to the fetch family (network, timeout,
    /// bad status, malformed or invalid payload). Fetch errors count towards
    /// the consecutive-failure counter and may downgrade the strategy.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::SourceStatus { .. }
                | Error::MalformedResponse(_)
                | Error::Timeout(_)
                | Error::InvalidSnapshot(_)
                | Error::DeltaMismatch(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_fetch_error());
        assert!(Error::SourceStatus {
            status: 503,
            url: "http://localhost/metadata".to_string()
        }
        .is_fetch_error());
        assert!(Error::MalformedResponse("eof".to_string()).is_fetch_error());

        assert!(!Error::Coordination("no leader".to_string()).is_fetch_error());
        assert!(!Error::NoSnapshot.is_fetch_error());
    }
}
