//! File-per-record lock store
//!
//! ```text
//! locks/
//! ├── .lease                  # lease sentinel, never deleted
//! ├── {lock_id}.json          # one record per lock, replaced atomically
//! └── archive/
//!     └── {YYYY-MM-DD}/       # date the lock became inactive
//!         └── {lock_id}.json
//! ```
//!
//! Every mutation runs under the store's lease. Reads take no lease: records
//! are only ever replaced by rename, so a reader sees whole records.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::model::{AcquireRequest, Lock, LockFilter, ReleaseOutcome};
use crate::clock::{self, SharedClock};
use crate::error::{CoordError, CoordResult};
use crate::id;
use crate::lease::{Lease, LeaseOptions};
use crate::persist;
use crate::scope;

const LEASE_FILE: &str = ".lease";
const ARCHIVE_DIR: &str = "archive";
const RECORD_EXT: &str = "json";

/// Persistent collection of locks
pub struct LockStore {
    dir: PathBuf,
    lease: LeaseOptions,
    clock: SharedClock,
}

impl LockStore {
    /// Open or create a lock store at the given directory
    pub fn open(dir: impl AsRef<Path>, lease: LeaseOptions, clock: SharedClock) -> CoordResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| CoordError::storage(&dir, e))?;
        debug!(?dir, "LockStore::open: opened");
        Ok(Self { dir, lease, clock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.dir.join(ARCHIVE_DIR)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a lock, or report every active lock it would overlap
    ///
    /// The overlap check and the write happen under one lease, so of several
    /// concurrent non-forced callers with overlapping scopes exactly one wins.
    /// The record is durable before this returns.
    pub fn acquire(&self, request: &AcquireRequest) -> CoordResult<Lock> {
        debug!(scope = ?request.scope, owner = %request.owner, force = request.force, "LockStore::acquire: called");
        let scope = request.validate()?;

        let _lease = self.lease()?;
        let now = self.clock.now();
        let expires_at = request.ttl.map(|ttl| clock::later(now, ttl)).transpose()?;

        let existing = self.load_all()?;
        let blocking: Vec<Lock> = existing
            .into_iter()
            .filter(|lock| lock.is_active(now) && scope::scopes_overlap(&lock.scope, &scope))
            .collect();

        if !blocking.is_empty() {
            if request.force {
                info!(
                    blocking = blocking.len(),
                    owner = %request.owner,
                    "LockStore::acquire: forcing past overlapping locks"
                );
            } else {
                debug!(blocking = blocking.len(), "LockStore::acquire: conflict");
                return Err(CoordError::Conflict {
                    requested: scope,
                    blocking,
                });
            }
        }

        let lock = Lock {
            lock_id: id::generate_id("lock"),
            scope,
            mode: request.mode.clone(),
            owner: request.owner.trim().to_string(),
            note: request.note.trim().to_string(),
            created_at: now,
            expires_at,
            force: request.force,
            released_at: None,
            released_by: None,
            announced: false,
        };

        persist::write_json_atomic(&self.record_path(&lock.lock_id), &lock)?;
        info!(lock_id = %lock.lock_id, owner = %lock.owner, "LockStore::acquire: created");
        Ok(lock)
    }

    /// Release a lock; releasing an inactive or archived lock succeeds unchanged
    pub fn release(&self, lock_id: &str, released_by: &str) -> CoordResult<ReleaseOutcome> {
        debug!(%lock_id, %released_by, "LockStore::release: called");
        check_record_id(lock_id)?;

        let _lease = self.lease()?;
        let now = self.clock.now();
        let path = self.record_path(lock_id);

        let Some(mut lock) = persist::read_json::<Lock>(&path)? else {
            return match self.find_archived(lock_id)? {
                Some(lock) => Ok(ReleaseOutcome::AlreadyInactive(lock)),
                None => Err(not_found(lock_id)),
            };
        };

        if lock.released_at.is_some() {
            debug!(%lock_id, "LockStore::release: already released");
            return Ok(ReleaseOutcome::AlreadyInactive(lock));
        }

        let was_active = lock.is_active(now);
        lock.released_at = Some(now);
        lock.released_by = Some(released_by.to_string());
        persist::write_json_atomic(&path, &lock)?;
        info!(%lock_id, was_active, "LockStore::release: released");

        if was_active {
            Ok(ReleaseOutcome::Released(lock))
        } else {
            Ok(ReleaseOutcome::AlreadyInactive(lock))
        }
    }

    /// Give an active lock a new expiry of `now + ttl`
    pub fn extend(&self, lock_id: &str, ttl: Duration) -> CoordResult<Lock> {
        debug!(%lock_id, ttl_secs = ttl.num_seconds(), "LockStore::extend: called");
        check_record_id(lock_id)?;
        if ttl <= Duration::zero() {
            return Err(CoordError::validation("lock ttl must be positive"));
        }

        let _lease = self.lease()?;
        let now = self.clock.now();
        let path = self.record_path(lock_id);
        let mut lock = persist::read_json::<Lock>(&path)?.ok_or_else(|| not_found(lock_id))?;

        if !lock.is_active(now) {
            return Err(CoordError::validation(format!(
                "lock {} is no longer active and cannot be extended",
                lock_id
            )));
        }

        let expires_at = clock::later(now, ttl)?;
        lock.expires_at = Some(expires_at);
        persist::write_json_atomic(&path, &lock)?;
        info!(%lock_id, %expires_at, "LockStore::extend: extended");
        Ok(lock)
    }

    /// Record that a lock's announcement note was posted
    pub fn mark_announced(&self, lock_id: &str) -> CoordResult<()> {
        debug!(%lock_id, "LockStore::mark_announced: called");
        check_record_id(lock_id)?;

        let _lease = self.lease()?;
        let path = self.record_path(lock_id);
        let mut lock = persist::read_json::<Lock>(&path)?.ok_or_else(|| not_found(lock_id))?;
        if !lock.announced {
            lock.announced = true;
            persist::write_json_atomic(&path, &lock)?;
        }
        Ok(())
    }

    /// Get a lock by exact id, looking in the archive as well
    pub fn get(&self, lock_id: &str) -> CoordResult<Lock> {
        debug!(%lock_id, "LockStore::get: called");
        check_record_id(lock_id)?;
        if let Some(lock) = persist::read_json::<Lock>(&self.record_path(lock_id))? {
            return Ok(lock);
        }
        self.find_archived(lock_id)?.ok_or_else(|| not_found(lock_id))
    }

    /// Resolve a full id or unique prefix to a lock id
    pub fn resolve_id(&self, reference: &str) -> CoordResult<String> {
        let mut ids = self.record_ids(&self.dir)?;
        ids.extend(self.archived_ids());
        id::resolve("Lock", reference, ids.iter().map(String::as_str))
    }

    /// List locks matching the filter, oldest first
    pub fn list(&self, filter: &LockFilter) -> CoordResult<Vec<Lock>> {
        debug!(?filter, "LockStore::list: called");
        let now = self.clock.now();
        let path = filter.path.as_deref().map(scope::normalize).transpose()?;
        let owner = filter.owner.as_deref().map(str::trim);

        let locks = self
            .load_all()?
            .into_iter()
            .filter(|lock| !filter.active_only || lock.is_active(now))
            .filter(|lock| owner.is_none_or(|o| lock.owner == o))
            .filter(|lock| {
                path.as_deref()
                    .is_none_or(|p| lock.scope.iter().any(|pattern| scope::overlaps(pattern, p)))
            })
            .collect();
        Ok(locks)
    }

    /// All locks that are currently active
    pub fn active(&self) -> CoordResult<Vec<Lock>> {
        self.list(&LockFilter {
            active_only: true,
            ..Default::default()
        })
    }

    pub(super) fn lease(&self) -> CoordResult<Lease> {
        Lease::acquire(&self.dir.join(LEASE_FILE), "lock store", self.lease)
    }

    pub(super) fn record_path(&self, lock_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", lock_id, RECORD_EXT))
    }

    /// Read every record in the live directory
    ///
    /// A record that vanishes between listing and reading was archived
    /// concurrently and is skipped. A record that fails to parse fails the
    /// whole call: guessing would risk missing a real conflict.
    pub(super) fn load_all(&self) -> CoordResult<Vec<Lock>> {
        let mut locks = Vec::new();
        for lock_id in self.record_ids(&self.dir)? {
            if let Some(lock) = persist::read_json::<Lock>(&self.record_path(&lock_id))? {
                locks.push(lock);
            }
        }
        locks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.lock_id.cmp(&b.lock_id)));
        Ok(locks)
    }

    fn record_ids(&self, dir: &Path) -> CoordResult<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoordError::storage(dir, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| CoordError::storage(dir, e))?.path();
            if path.is_file()
                && path.extension().is_some_and(|ext| ext == RECORD_EXT)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn archived_paths(&self) -> impl Iterator<Item = PathBuf> {
        WalkDir::new(self.archive_dir())
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == RECORD_EXT))
    }

    fn archived_ids(&self) -> Vec<String> {
        self.archived_paths()
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect()
    }

    pub(super) fn find_archived(&self, lock_id: &str) -> CoordResult<Option<Lock>> {
        let file_name = format!("{}.{}", lock_id, RECORD_EXT);
        match self
            .archived_paths()
            .find(|path| path.file_name().is_some_and(|name| name == file_name.as_str()))
        {
            Some(path) => persist::read_json(&path),
            None => Ok(None),
        }
    }
}

fn not_found(lock_id: &str) -> CoordError {
    CoordError::NotFound {
        kind: "Lock",
        id: lock_id.to_string(),
    }
}

/// Lock ids become file names, so only id-shaped strings are accepted
fn check_record_id(lock_id: &str) -> CoordResult<()> {
    let valid = !lock_id.is_empty() && lock_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CoordError::validation(format!("malformed lock id {:?}", lock_id)))
    }
}
