//! Conflict detection and resolution
//!
//! Compares the locally applied snapshot with a freshly fetched one,
//! classifies how they diverge, and decides which snapshot (if any) the
//! synchronizer should apply.

mod detect;
mod merge;
mod resolver;

pub use detect::{detect_conflicts, ConflictReport, ConflictType, TIMESTAMP_CONFLICT_WINDOW_SECS};
pub use merge::merge_snapshots;
pub use resolver::{
    ConflictResolver, MergeTieBreak, ResolutionAction, ResolutionOutcome, ResolutionPolicy,
};
