//! Leaseboard configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoordError, CoordResult};
use crate::lease::LeaseOptions;

/// Environment variable overriding `storage.root`
pub const ROOT_ENV: &str = "LEASEBOARD_ROOT";

/// Environment variable overriding `agent.id`
pub const AGENT_ENV: &str = "LEASEBOARD_AGENT";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the stores live
    pub storage: StorageConfig,

    /// Lease timing
    pub lease: LeaseConfig,

    /// Lock defaults and retention
    pub locks: LocksConfig,

    /// Identity used when none is given on the command line
    pub agent: AgentConfig,

    /// Log level when `--log-level` is not given
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.storage.root.as_os_str().is_empty() {
            return Err(eyre::eyre!("storage.root must not be empty"));
        }
        if self.lease.timeout_ms == 0 {
            return Err(eyre::eyre!("lease.timeout-ms must be greater than zero"));
        }
        if self.lease.poll_interval_ms == 0 || self.lease.poll_interval_ms >= self.lease.timeout_ms {
            return Err(eyre::eyre!(
                "lease.poll-interval-ms must be greater than zero and less than lease.timeout-ms ({})",
                self.lease.timeout_ms
            ));
        }
        if self.locks.default_ttl_minutes == Some(0) {
            return Err(eyre::eyre!("locks.default-ttl-minutes must be greater than zero when set"));
        }
        // Both spans must also land on a representable instant from today
        let now = chrono::Utc::now();
        if let Some(ttl) = self.default_ttl().map_err(|e| eyre::eyre!("{}", e))? {
            crate::clock::later(now, ttl).map_err(|e| eyre::eyre!("locks.default-ttl-minutes: {}", e))?;
        }
        crate::clock::days(self.locks.archive_retention_days.into(), "locks.archive-retention-days")
            .and_then(|age| crate::clock::earlier(now, age))
            .map_err(|e| eyre::eyre!("{}", e))?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .leaseboard.yml
        let local_config = PathBuf::from(".leaseboard.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/leaseboard/leaseboard.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("leaseboard").join("leaseboard.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply `LEASEBOARD_ROOT` and `LEASEBOARD_AGENT` from the environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ROOT_ENV).ok(),
            std::env::var(AGENT_ENV).ok(),
        );
    }

    /// Apply explicit overrides; empty values are ignored
    pub fn apply_overrides(&mut self, root: Option<String>, agent: Option<String>) {
        if let Some(root) = root.filter(|r| !r.trim().is_empty()) {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(agent) = agent.filter(|a| !a.trim().is_empty()) {
            self.agent.id = Some(agent.trim().to_string());
        }
    }

    pub fn lease_options(&self) -> LeaseOptions {
        LeaseOptions {
            timeout: Duration::from_millis(self.lease.timeout_ms),
            poll_interval: Duration::from_millis(self.lease.poll_interval_ms),
        }
    }

    /// TTL applied when a lock request gives none; None means no auto-expiry
    pub fn default_ttl(&self) -> CoordResult<Option<chrono::Duration>> {
        self.locks
            .default_ttl_minutes
            .map(|m| {
                let minutes = i64::try_from(m).map_err(|_| {
                    CoordError::validation(format!("locks.default-ttl-minutes of {} is out of range", m))
                })?;
                crate::clock::minutes(minutes, "locks.default-ttl-minutes")
            })
            .transpose()
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding locks/, board.json and events.jsonl
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".leaseboard"),
        }
    }
}

/// Lease timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// How long to wait for a store lease before reporting busy
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Delay between lock attempts while waiting
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        let defaults = LeaseOptions::default();
        Self {
            timeout_ms: defaults.timeout.as_millis() as u64,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
        }
    }
}

/// Lock defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksConfig {
    /// TTL when `--ttl-minutes` is omitted; unset means locks never expire on their own
    #[serde(rename = "default-ttl-minutes", skip_serializing_if = "Option::is_none")]
    pub default_ttl_minutes: Option<u64>,

    /// Prune age when `--older-than-days` is omitted
    #[serde(rename = "archive-retention-days")]
    pub archive_retention_days: u32,

    /// Post a board note for each new lock
    pub announce: bool,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            default_ttl_minutes: None,
            archive_retention_days: 7,
            announce: true,
        }
    }
}

/// Agent identity configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}
