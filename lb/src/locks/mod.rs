//! Path-scope locks
//!
//! A lock records one worker's intent to mutate everything under a scope.
//! Locks are advisory: cooperating workers check before they write.

mod maintenance;
mod model;
mod store;

pub use maintenance::STALE_TEMP_AGE;
pub use model::{AcquireRequest, Lock, LockFilter, LockMode, PruneReport, ReleaseOutcome};
pub use store::LockStore;
