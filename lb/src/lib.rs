//! Leaseboard - local coordination for agents sharing one working tree
//!
//! Agents claim path patterns with advisory locks before editing, and talk
//! through a shared board of statuses, threaded notes and area ownership.
//! Everything lives in plain files; processes coordinate through short
//! OS-level leases and atomic replace.
//!
//! # Architecture
//!
//! ```text
//! .leaseboard/
//! ├── locks/
//! │   ├── .lease
//! │   ├── {lock_id}.json
//! │   └── archive/{YYYY-MM-DD}/{lock_id}.json
//! ├── board.json
//! ├── board.lease
//! ├── events.jsonl
//! ├── events.lease
//! └── agents/{agent_id}.json     # heartbeats, read-only here
//! ```
//!
//! # Example
//!
//! ```ignore
//! use leaseboard::{AcquireRequest, Config, Coordinator};
//!
//! let coord = Coordinator::open(&Config::default())?;
//! let outcome = coord.acquire(AcquireRequest::new(vec!["docs/**".into()], "agent-a", "rewriting docs"), None)?;
//! // ... edit files under docs/ ...
//! coord.release(&outcome.lock.lock_id, "agent-a")?;
//! ```

pub mod agent;
pub mod announce;
pub mod board;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod id;
pub mod lease;
pub mod locks;
pub mod persist;
pub mod scope;

pub use board::{Area, Board, BoardStore, Note, Status, ThreadSummary};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Config;
pub use coordinator::{AcquireOutcome, BoardView, Coordinator, Outcome};
pub use error::{CoordError, CoordResult};
pub use events::{EventKind, EventLog, EventRecord};
pub use lease::{Lease, LeaseOptions};
pub use locks::{AcquireRequest, Lock, LockFilter, LockMode, LockStore, PruneReport, ReleaseOutcome};
