//! Lock records

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoordError, CoordResult};
use crate::scope;

/// What a lock asks other workers to refrain from
///
/// Unknown modes written by newer tools are kept verbatim so old binaries can
/// still read, list and release those records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    /// Do not modify anything in scope
    #[default]
    NoTouch,
    /// Only the owner may read or modify anything in scope
    Exclusive,
    Other(String),
}

impl LockMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NoTouch => "no-touch",
            Self::Exclusive => "exclusive",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for LockMode {
    fn from(s: &str) -> Self {
        match s {
            "no-touch" => Self::NoTouch,
            "exclusive" => Self::Exclusive,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::str::FromStr for LockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("lock mode must not be empty".to_string());
        }
        Ok(Self::from(s))
    }
}

impl Serialize for LockMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LockMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// A claim of intent over a set of path patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub lock_id: String,
    /// Normalized path patterns, never empty
    pub scope: Vec<String>,
    #[serde(default)]
    pub mode: LockMode,
    pub owner: String,
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
    /// Absent means the lock never expires on its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_by: Option<String>,
    #[serde(default)]
    pub announced: bool,
}

impl Lock {
    /// Not released and not past its expiry
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.released_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }

    /// When the lock stopped being active, if it has
    pub fn inactive_since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let expired = self.expires_at.filter(|exp| *exp <= now);
        match (self.released_at, expired) {
            (Some(r), Some(e)) => Some(r.min(e)),
            (Some(r), None) => Some(r),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        }
    }

    pub fn never_expires(&self) -> bool {
        self.expires_at.is_none()
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        format!(
            "{} owner={} mode={} scope=[{}] note={:?}",
            self.lock_id,
            self.owner,
            self.mode,
            self.scope.join(", "),
            self.note
        )
    }
}

/// Parameters for creating a lock
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub scope: Vec<String>,
    pub owner: String,
    pub mode: LockMode,
    /// None means no auto-expiry
    pub ttl: Option<Duration>,
    pub note: String,
    /// Create even if the scope overlaps active locks; requires a note
    pub force: bool,
}

impl AcquireRequest {
    pub fn new(scope: Vec<String>, owner: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            scope,
            owner: owner.into(),
            mode: LockMode::default(),
            ttl: None,
            note: note.into(),
            force: false,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_mode(mut self, mode: LockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Check the request and return its normalized scope
    pub fn validate(&self) -> CoordResult<Vec<String>> {
        let scope = scope::normalize_scope(&self.scope)?;
        if self.owner.trim().is_empty() {
            return Err(CoordError::validation("lock owner must not be empty"));
        }
        if self.force && self.note.trim().is_empty() {
            return Err(CoordError::validation(
                "a forced lock requires a note explaining the reviewed rationale",
            ));
        }
        if let Some(ttl) = self.ttl
            && ttl <= Duration::zero()
        {
            return Err(CoordError::validation("lock ttl must be positive"));
        }
        Ok(scope)
    }
}

/// Filters for listing locks
#[derive(Debug, Clone, Default)]
pub struct LockFilter {
    pub active_only: bool,
    /// Concrete path or pattern; matches locks whose scope overlaps it
    pub path: Option<String>,
    pub owner: Option<String>,
}

/// Result of releasing a lock
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "lock", rename_all = "kebab-case")]
pub enum ReleaseOutcome {
    Released(Lock),
    /// Already released, expired or archived; nothing changed
    AlreadyInactive(Lock),
}

impl ReleaseOutcome {
    pub fn lock(&self) -> &Lock {
        match self {
            Self::Released(lock) | Self::AlreadyInactive(lock) => lock,
        }
    }
}

/// Result of a prune pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PruneReport {
    pub archived: usize,
    pub lock_ids: Vec<String>,
    pub dry_run: bool,
    /// Leftover temp files from interrupted writes
    pub temp_files_removed: usize,
}
