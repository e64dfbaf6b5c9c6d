//! Policy synchronization
//!
//! The synchronizer fetches the policy source on a fixed delay (or on
//! demand), reconciles the result with the applied snapshot, hands
//! significant changes to the cluster coordinator and finally swaps the new
//! snapshot in. Attempts are serialized; a failed attempt never touches the
//! applied snapshot.

mod context;
mod engine;
mod status;
mod synchronizer;

pub use context::{SyncContext, SyncTrigger};
pub use engine::{AuthorizationEngine, PolicyChange};
pub use status::{AttemptPhase, SyncHealthStatus, SyncOutcome, SynchronizerStatus};
pub use synchronizer::{PolicySynchronizer, SyncDependencies};
