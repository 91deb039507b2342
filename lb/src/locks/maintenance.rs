//! Audit and prune passes over the lock store
//!
//! Audit is a read-only report for humans. Prune moves records that are
//! already inactive into the dated archive; it never looks at active locks.

use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{debug, info};

use super::model::{Lock, PruneReport};
use super::store::LockStore;
use crate::clock;
use crate::error::{CoordError, CoordResult};
use crate::persist;

/// Temp files younger than this may belong to a write in progress
pub const STALE_TEMP_AGE: StdDuration = StdDuration::from_secs(60 * 60);

impl LockStore {
    /// Active locks that will never expire on their own
    ///
    /// With `older_than`, only those created at least that long ago.
    pub fn audit(&self, older_than: Option<Duration>) -> CoordResult<Vec<Lock>> {
        debug!(?older_than, "LockStore::audit: called");
        let now = self.now();
        let cutoff = older_than.map(|age| clock::earlier(now, age)).transpose()?;

        let flagged = self
            .load_all()?
            .into_iter()
            .filter(|lock| lock.is_active(now) && lock.never_expires())
            .filter(|lock| cutoff.is_none_or(|c| lock.created_at <= c))
            .collect();
        Ok(flagged)
    }

    /// Archive inactive locks that became inactive at least `older_than_days` ago
    ///
    /// Each record is moved with a single rename into
    /// `archive/{date it became inactive}/`, so a crash leaves it wholly in
    /// one place. Temp files abandoned by crashed writers are removed too.
    /// With `dry_run` nothing moves.
    pub fn prune(&self, older_than_days: i64, dry_run: bool) -> CoordResult<PruneReport> {
        debug!(older_than_days, dry_run, "LockStore::prune: called");
        if older_than_days < 0 {
            return Err(CoordError::validation("prune age must not be negative"));
        }

        let age = clock::days(older_than_days, "prune age")?;

        let _lease = self.lease()?;
        let now = self.now();
        let cutoff = clock::earlier(now, age)?;

        let mut report = PruneReport {
            dry_run,
            ..Default::default()
        };

        for lock in self.load_all()? {
            if lock.is_active(now) {
                continue;
            }
            let Some(since) = lock.inactive_since(now) else {
                continue;
            };
            if since > cutoff {
                continue;
            }

            if !dry_run {
                let partition = since.format("%Y-%m-%d").to_string();
                let target = self
                    .archive_dir()
                    .join(partition)
                    .join(format!("{}.json", lock.lock_id));
                persist::move_atomic(&self.record_path(&lock.lock_id), &target)?;
                debug!(lock_id = %lock.lock_id, ?target, "LockStore::prune: archived");
            }
            report.lock_ids.push(lock.lock_id);
        }

        report.archived = report.lock_ids.len();
        report.temp_files_removed = persist::sweep_temp_files(self.dir(), STALE_TEMP_AGE, dry_run)?;
        info!(
            archived = report.archived,
            temp_files = report.temp_files_removed,
            dry_run,
            "LockStore::prune: complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lease::LeaseOptions;
    use crate::locks::{AcquireRequest, LockFilter, LockStore, ReleaseOutcome};
    use chrono::Utc;
    use std::fs;
    use std::sync::Arc;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ManualClock, LockStore) {
        let temp = TempDir::new().unwrap();
        let clock = ManualClock::new(Utc::now());
        let store = LockStore::open(temp.path().join("locks"), LeaseOptions::default(), Arc::new(clock.clone())).unwrap();
        (temp, clock, store)
    }

    fn request(scope: &str) -> AcquireRequest {
        AcquireRequest::new(vec![scope.to_string()], "A", "x")
    }

    #[test]
    fn test_audit_reports_only_unbounded_active_locks() {
        let (_temp, clock, store) = setup();
        let forever = store.acquire(&request("a")).unwrap();
        store.acquire(&request("b").with_ttl(Duration::minutes(60))).unwrap();
        let released = store.acquire(&request("c")).unwrap();
        store.release(&released.lock_id, "A").unwrap();

        let flagged = store.audit(None).unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].lock_id, forever.lock_id);

        // Age cutoff
        assert!(store.audit(Some(Duration::hours(1))).unwrap().is_empty());
        clock.advance(Duration::hours(2));
        assert_eq!(store.audit(Some(Duration::hours(1))).unwrap().len(), 1);

        // Giving it an expiry removes it from the report
        store.extend(&forever.lock_id, Duration::minutes(5)).unwrap();
        assert!(store.audit(None).unwrap().is_empty());
    }

    #[test]
    fn test_prune_archives_expired_lock() {
        let (_temp, clock, store) = setup();
        let lock = store.acquire(&request("docs/a.md").with_ttl(Duration::minutes(60))).unwrap();

        clock.advance(Duration::minutes(61));
        let report = store.prune(0, false).unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(report.lock_ids, vec![lock.lock_id.clone()]);

        assert!(!store.record_path(&lock.lock_id).exists());
        let partition = (lock.created_at + Duration::minutes(60)).format("%Y-%m-%d").to_string();
        assert!(
            store
                .archive_dir()
                .join(partition)
                .join(format!("{}.json", lock.lock_id))
                .exists()
        );

        // Archived locks are still visible by id and release stays idempotent
        assert_eq!(store.get(&lock.lock_id).unwrap().lock_id, lock.lock_id);
        assert!(matches!(
            store.release(&lock.lock_id, "A").unwrap(),
            ReleaseOutcome::AlreadyInactive(_)
        ));
        assert!(store.list(&LockFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_prune_never_touches_active_locks() {
        let (_temp, clock, store) = setup();
        let forever = store.acquire(&request("a")).unwrap();
        let long_ttl = store.acquire(&request("b").with_ttl(Duration::days(400))).unwrap();

        clock.advance(Duration::days(365));
        for days in [0, 1, 30, 365] {
            let report = store.prune(days, false).unwrap();
            assert_eq!(report.archived, 0);
        }
        let active: Vec<String> = store.active().unwrap().into_iter().map(|l| l.lock_id).collect();
        assert_eq!(active, vec![forever.lock_id, long_ttl.lock_id]);
    }

    #[test]
    fn test_prune_respects_retention_and_dry_run() {
        let (_temp, clock, store) = setup();
        let lock = store.acquire(&request("a")).unwrap();
        store.release(&lock.lock_id, "A").unwrap();

        clock.advance(Duration::days(3));
        assert_eq!(store.prune(7, false).unwrap().archived, 0);

        let dry = store.prune(2, true).unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.archived, 1);
        assert!(store.record_path(&lock.lock_id).exists());

        assert_eq!(store.prune(2, false).unwrap().archived, 1);
        assert!(!store.record_path(&lock.lock_id).exists());
        assert!(store.prune(-1, false).is_err());
        assert!(matches!(
            store.prune(1_000_000_000_000, false),
            Err(CoordError::Validation(_))
        ));
    }

    #[test]
    fn test_out_of_range_audit_age_is_rejected() {
        let (_temp, _clock, store) = setup();
        store.acquire(&request("a")).unwrap();
        let age = Duration::try_hours(2_000_000_000_000).unwrap();
        assert!(matches!(store.audit(Some(age)), Err(CoordError::Validation(_))));
    }

    #[test]
    fn test_prune_sweeps_abandoned_temp_files() {
        let (_temp, _clock, store) = setup();
        let abandoned = store.dir().join(format!("{}x1y2z3", persist::TEMP_PREFIX));
        fs::write(&abandoned, "{\"lock_id\":").unwrap();
        let old = SystemTime::now() - STALE_TEMP_AGE - StdDuration::from_secs(60);
        fs::File::options().write(true).open(&abandoned).unwrap().set_modified(old).unwrap();

        let dry = store.prune(0, true).unwrap();
        assert_eq!(dry.temp_files_removed, 1);
        assert!(abandoned.exists());

        let report = store.prune(0, false).unwrap();
        assert_eq!(report.temp_files_removed, 1);
        assert_eq!(report.archived, 0);
        assert!(!abandoned.exists());
    }
}
