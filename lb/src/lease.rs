//! Short-lived exclusive lease on a sentinel file
//!
//! A lease serializes one read-modify-write cycle of a store across processes.
//! It is an OS advisory lock (`flock` on unix) taken on a small sentinel file
//! that is reopened and relocked on every cycle and never deleted, so there is
//! no window in which two processes hold locks on different inodes.
//!
//! The lock is released when the [`Lease`] is dropped, including on panic and
//! when the holding process dies.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{CoordError, CoordResult};

/// Default time to wait for a lease before reporting busy
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay between lock attempts while waiting
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Timing for lease acquisition
#[derive(Debug, Clone, Copy)]
pub struct LeaseOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LEASE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Held lease; dropping it releases the lock
#[derive(Debug)]
pub struct Lease {
    file: File,
    path: PathBuf,
}

impl Lease {
    /// Acquire the lease at `path`, waiting up to `options.timeout`
    ///
    /// `resource` names the guarded store in the busy error.
    pub fn acquire(path: &Path, resource: &str, options: LeaseOptions) -> CoordResult<Self> {
        debug!(?path, resource, "Lease::acquire: called");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoordError::storage(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| CoordError::storage(path, e))?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(?path, waited_ms = start.elapsed().as_millis() as u64, "Lease::acquire: held");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if start.elapsed() >= options.timeout {
                        warn!(?path, resource, "Lease::acquire: timed out");
                        return Err(CoordError::Busy {
                            resource: resource.to_string(),
                            waited_ms: options.timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(options.poll_interval);
                }
                Err(e) => return Err(CoordError::storage(path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well; unlocking first
        // hands it to the next waiter without waiting for the close.
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = ?self.path, error = %e, "Lease::drop: unlock failed, relying on close");
        }
        debug!(path = ?self.path, "Lease::drop: released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quick() -> LeaseOptions {
        LeaseOptions {
            timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_lease_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.lease");

        let held = Lease::acquire(&path, "store", quick()).unwrap();
        let err = Lease::acquire(&path, "store", quick()).unwrap_err();
        assert!(matches!(err, CoordError::Busy { .. }));

        drop(held);
        assert!(Lease::acquire(&path, "store", quick()).is_ok());
    }

    #[test]
    fn test_sentinel_survives_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("store.lease");

        let lease = Lease::acquire(&path, "store", quick()).unwrap();
        assert_eq!(lease.path(), path.as_path());
        drop(lease);
        assert!(path.exists());
    }

    #[test]
    fn test_waiter_gets_lease_after_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.lease");

        let held = Lease::acquire(&path, "store", quick()).unwrap();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            Lease::acquire(
                &waiter_path,
                "store",
                LeaseOptions {
                    timeout: Duration::from_secs(5),
                    poll_interval: Duration::from_millis(5),
                },
            )
            .map(|_| ())
        });

        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_unwritable_location_fails_closed() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        let err = Lease::acquire(&blocker.join("store.lease"), "store", quick()).unwrap_err();
        assert!(matches!(err, CoordError::Storage { .. }));
    }
}
