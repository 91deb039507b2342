//! Error taxonomy shared by every store
//!
//! Each variant maps to a stable process exit code so that automated callers
//! can tell "fix your request" apart from "try again shortly".

use std::path::PathBuf;
use thiserror::Error;

use crate::locks::Lock;

/// Errors returned by the lock store, the board and the event log
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{}", conflict_message(.requested, .blocking))]
    Conflict { requested: Vec<String>, blocking: Vec<Lock> },

    #[error("{resource} is busy (lease not acquired within {waited_ms}ms); retry shortly")]
    Busy { resource: String, waited_ms: u64 },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt data at {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// Result alias for store operations
pub type CoordResult<T> = Result<T, CoordError>;

impl CoordError {
    /// Wrap an I/O failure with the path it happened on
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Process exit code for this error
    ///
    /// 2 = caller's fault (validation, conflict, unknown id), 3 = busy, 1 = anything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Conflict { .. } | Self::NotFound { .. } => 2,
            Self::Busy { .. } => 3,
            Self::Storage { .. } | Self::Corrupt { .. } => 1,
        }
    }

    /// Whether retrying the same call unchanged can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

fn conflict_message(requested: &[String], blocking: &[Lock]) -> String {
    let mut msg = format!(
        "Scope [{}] conflicts with {} active lock(s):",
        requested.join(", "),
        blocking.len()
    );
    for lock in blocking {
        msg.push_str(&format!(
            "\n  {} owner={} scope=[{}] note={:?}",
            lock.lock_id,
            lock.owner,
            lock.scope.join(", "),
            lock.note
        ));
    }
    msg.push_str("\nRetry later, narrow the scope, or use --force with a reviewed note.");
    msg
}
