//! Atomic JSON persistence
//!
//! Writes go to a temp file in the target's directory, are synced, and then
//! renamed over the target. Readers therefore see either the previous
//! document or the new one, never a partial write, and need no lease.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;
use tracing::{debug, warn};

use crate::error::{CoordError, CoordResult};

/// Prefix of in-flight temp files; leftovers from a crash are swept by prune
pub const TEMP_PREFIX: &str = ".lb-tmp";

/// Serialize `value` as pretty JSON and atomically replace `path` with it
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> CoordResult<()> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| CoordError::corrupt(path, e))?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Atomically replace `path` with `data`
pub fn write_atomic(path: &Path, data: &[u8]) -> CoordResult<()> {
    debug!(?path, len = data.len(), "write_atomic: called");
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| CoordError::storage(parent, e))?;

    let mut temp = Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| CoordError::storage(parent, e))?;
    temp.write_all(data).map_err(|e| CoordError::storage(temp.path(), e))?;
    temp.as_file().sync_all().map_err(|e| CoordError::storage(temp.path(), e))?;
    temp.persist(path).map_err(|e| CoordError::storage(path, e.error))?;

    Ok(())
}

/// Read and parse a JSON file; `Ok(None)` when it does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> CoordResult<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CoordError::storage(path, e)),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| CoordError::corrupt(path, e))
}

/// Atomically move a file, creating the destination directory first
///
/// Both paths must live on the same filesystem so the rename is atomic: the
/// file ends up entirely at `from` or entirely at `to`.
pub fn move_atomic(from: &Path, to: &Path) -> CoordResult<()> {
    debug!(?from, ?to, "move_atomic: called");
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| CoordError::storage(parent, e))?;
    }
    fs::rename(from, to).map_err(|e| CoordError::storage(from, e))
}

/// Remove temp files in `dir` left behind by writers that died before rename
///
/// Only files last modified at least `min_age` ago are touched, so a write in
/// progress keeps its temp file. With `dry_run` the files are only counted.
pub fn sweep_temp_files(dir: &Path, min_age: Duration, dry_run: bool) -> CoordResult<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CoordError::storage(dir, e)),
    };

    let mut swept = 0;
    for entry in entries {
        let entry = entry.map_err(|e| CoordError::storage(dir, e))?;
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= min_age);
        if !stale {
            continue;
        }

        let path = entry.path();
        if !dry_run {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(?path, error = %e, "sweep_temp_files: could not remove");
                    continue;
                }
            }
        }
        debug!(?path, dry_run, "sweep_temp_files: stale temp file");
        swept += 1;
    }
    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json");
        let doc = Doc {
            name: "board".to_string(),
            count: 3,
        };

        write_json_atomic(&path, &doc).unwrap();
        let back: Option<Doc> = read_json(&path).unwrap();
        assert_eq!(back, Some(doc));
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let temp = TempDir::new().unwrap();
        let back: Option<Doc> = read_json(&temp.path().join("absent.json")).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json");
        fs::write(&path, "{\"name\": \"half").unwrap();

        let err = read_json::<Doc>(&path).unwrap_err();
        assert!(matches!(err, CoordError::Corrupt { .. }));
    }

    #[test]
    fn test_replace_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json");
        for count in 0..5 {
            write_json_atomic(
                &path,
                &Doc {
                    name: "x".to_string(),
                    count,
                },
            )
            .unwrap();
        }

        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_stale_temp_files() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join(format!("{}abc123", TEMP_PREFIX));
        let fresh = temp.path().join(format!("{}def456", TEMP_PREFIX));
        let record = temp.path().join("lock-1.json");
        for path in [&stale, &fresh, &record] {
            fs::write(path, "{}").unwrap();
        }
        let old = std::time::SystemTime::now() - Duration::from_secs(2 * 3600);
        fs::File::options().write(true).open(&stale).unwrap().set_modified(old).unwrap();
        fs::File::options().write(true).open(&record).unwrap().set_modified(old).unwrap();

        let hour = Duration::from_secs(3600);
        assert_eq!(sweep_temp_files(temp.path(), hour, true).unwrap(), 1);
        assert!(stale.exists());

        assert_eq!(sweep_temp_files(temp.path(), hour, false).unwrap(), 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(record.exists());
        assert_eq!(sweep_temp_files(&temp.path().join("absent"), hour, false).unwrap(), 0);
    }

    #[test]
    fn test_move_atomic_creates_destination() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("a.json");
        let to = temp.path().join("archive").join("2026-01-01").join("a.json");
        fs::write(&from, "{}").unwrap();

        move_atomic(&from, &to).unwrap();
        assert!(!from.exists());
        assert!(to.exists());
    }
}
