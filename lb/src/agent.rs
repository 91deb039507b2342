//! Agent identity and heartbeat records
//!
//! Heartbeats under `agents/` are written by whatever supervises the agents;
//! this crate only reads them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::persist;

const UNKNOWN_AGENT: &str = "unknown";

/// Pick the acting agent id
///
/// Order: explicit flag, then configured id (which already carries
/// `LEASEBOARD_AGENT`), then `$USER`, then `"unknown"`.
pub fn resolve_agent_id(explicit: Option<&str>, config: &Config) -> String {
    pick_identity(explicit, config.agent.id.as_deref(), std::env::var("USER").ok())
}

fn pick_identity(explicit: Option<&str>, configured: Option<&str>, user: Option<String>) -> String {
    explicit
        .map(str::to_string)
        .into_iter()
        .chain(configured.map(str::to_string))
        .chain(user)
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_AGENT.to_string())
}

/// Contents of `agents/<agent_id>.json`; unknown fields are ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Read-only view of the heartbeat directory
pub struct AgentDirectory {
    dir: PathBuf,
}

impl AgentDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Last heartbeat for an agent, if it has a readable record
    ///
    /// A malformed record is logged and treated as absent.
    pub fn last_heartbeat(&self, agent_id: &str) -> Option<DateTime<Utc>> {
        debug!(%agent_id, "AgentDirectory::last_heartbeat: called");
        if agent_id.is_empty() || agent_id.contains(['/', '\\']) || agent_id.starts_with('.') {
            return None;
        }

        let path = self.dir.join(format!("{}.json", agent_id));
        match persist::read_json::<AgentRecord>(&path) {
            Ok(record) => record.and_then(|r| r.last_heartbeat),
            Err(e) => {
                warn!(%agent_id, error = %e, "AgentDirectory::last_heartbeat: unreadable record");
                None
            }
        }
    }
}
