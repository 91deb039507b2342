//! Append-only event log
//!
//! One JSON line per committed state change across both stores. Sequence
//! numbers are assigned under the log's own lease, so they increase strictly
//! across processes. Appending is the only mutation.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::error::{CoordError, CoordResult};
use crate::lease::{Lease, LeaseOptions};

/// Bytes read from the end of the log when looking for the last record
const TAIL_WINDOW: u64 = 8 * 1024;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    LockCreated,
    LockReleased,
    LockExtended,
    LockPruned,
    NotePosted,
    StatusSet,
    AreaChanged,
    BoardNormalized,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LockCreated => "lock-created",
            Self::LockReleased => "lock-released",
            Self::LockExtended => "lock-extended",
            Self::LockPruned => "lock-pruned",
            Self::NotePosted => "note-posted",
            Self::StatusSet => "status-set",
            Self::AreaChanged => "area-changed",
            Self::BoardNormalized => "board-normalized",
        };
        write!(f, "{}", s)
    }
}

/// One line of the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    /// Agent that made the change
    pub actor: String,
    /// Lock id, note id, agent id or area name
    pub subject: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Handle to `events.jsonl` and its lease
pub struct EventLog {
    path: PathBuf,
    lease_path: PathBuf,
    lease: LeaseOptions,
    clock: SharedClock,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, lease: LeaseOptions, clock: SharedClock) -> Self {
        let path = path.into();
        let lease_path = path.with_extension("lease");
        Self {
            path,
            lease_path,
            lease,
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, returning it with its assigned sequence number
    pub fn append(
        &self,
        kind: EventKind,
        actor: &str,
        subject: &str,
        detail: serde_json::Value,
    ) -> CoordResult<EventRecord> {
        debug!(%kind, %actor, %subject, "EventLog::append: called");
        let _lease = Lease::acquire(&self.lease_path, "event log", self.lease)?;

        let (last_seq, terminated) = self.last_seq()?;

        let record = EventRecord {
            seq: last_seq + 1,
            at: self.clock.now(),
            kind,
            actor: actor.to_string(),
            subject: subject.to_string(),
            detail,
        };

        let mut line = serde_json::to_string(&record).map_err(|e| CoordError::corrupt(&self.path, e))?;
        line.push('\n');
        // A crash mid-append can leave an unterminated line; never glue onto it
        if !terminated {
            line.insert(0, '\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoordError::storage(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| CoordError::storage(&self.path, e))?;
        file.sync_all().map_err(|e| CoordError::storage(&self.path, e))?;

        debug!(seq = record.seq, "EventLog::append: written");
        Ok(record)
    }

    /// Every parseable record, oldest first
    pub fn read_all(&self) -> CoordResult<Vec<EventRecord>> {
        let content = self.read_raw()?;
        Ok(parse_lines(&content, &self.path))
    }

    /// The last `limit` records, oldest first
    pub fn tail(&self, limit: usize) -> CoordResult<Vec<EventRecord>> {
        let mut records = self.read_all()?;
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }

    /// Sequence number of the last readable record, and whether the file
    /// ends with a newline
    ///
    /// Reads backwards from the end in growing windows instead of parsing
    /// the whole log.
    fn last_seq(&self) -> CoordResult<(u64, bool)> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((0, true)),
            Err(e) => return Err(CoordError::storage(&self.path, e)),
        };
        let len = file.metadata().map_err(|e| CoordError::storage(&self.path, e))?.len();
        if len == 0 {
            return Ok((0, true));
        }

        let mut window = TAIL_WINDOW;
        loop {
            let start = len.saturating_sub(window);
            let mut buf = Vec::new();
            file.seek(SeekFrom::Start(start))
                .and_then(|_| (&mut file).take(len - start).read_to_end(&mut buf))
                .map_err(|e| CoordError::storage(&self.path, e))?;

            let terminated = buf.last() == Some(&b'\n');
            let text = String::from_utf8_lossy(&buf);
            // The first line of a partial window may start mid-record
            let found = text
                .lines()
                .skip(usize::from(start > 0))
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .filter(|line| !line.trim().is_empty())
                .find_map(|line| serde_json::from_str::<EventRecord>(line).ok());

            match found {
                Some(record) => return Ok((record.seq, terminated)),
                None if start == 0 => return Ok((0, terminated)),
                None => window = window.saturating_mul(2),
            }
        }
    }

    fn read_raw(&self) -> CoordResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(CoordError::storage(&self.path, e)),
        }
    }
}

fn parse_lines(content: &str, path: &Path) -> Vec<EventRecord> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str::<EventRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(?path, line = n + 1, error = %e, "EventLog: skipping unreadable line");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, EventLog) {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new(temp.path().join("events.jsonl"), LeaseOptions::default(), system_clock());
        (temp, log)
    }

    #[test]
    fn test_empty_log() {
        let (_temp, log) = setup();
        assert!(log.read_all().unwrap().is_empty());
        assert!(log.tail(5).unwrap().is_empty());
    }

    #[test]
    fn test_sequence_increases() {
        let (_temp, log) = setup();
        let a = log.append(EventKind::LockCreated, "A", "lock-1", json!({"scope": ["a"]})).unwrap();
        let b = log.append(EventKind::LockReleased, "A", "lock-1", json!(null)).unwrap();
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);

        let all = log.read_all().unwrap();
        assert_eq!(all, vec![a, b]);
        assert!(fs::read_to_string(log.path()).unwrap().contains("\"kind\":\"lock-released\""));
    }

    #[test]
    fn test_tail() {
        let (_temp, log) = setup();
        for i in 0..5 {
            log.append(EventKind::StatusSet, "A", &format!("s{}", i), json!({})).unwrap();
        }
        let tail: Vec<u64> = log.tail(2).unwrap().into_iter().map(|r| r.seq).collect();
        assert_eq!(tail, vec![4, 5]);
        assert_eq!(log.tail(50).unwrap().len(), 5);
    }

    #[test]
    fn test_sequence_found_past_a_long_unreadable_tail() {
        let (_temp, log) = setup();
        let big = "x".repeat(3 * TAIL_WINDOW as usize);
        for i in 0..3 {
            log.append(EventKind::NotePosted, "A", &format!("note-{}", i), json!({ "body": big }))
                .unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(format!("{}\n", "#".repeat(2 * TAIL_WINDOW as usize)).as_bytes()).unwrap();

        let next = log.append(EventKind::StatusSet, "A", "A", json!({})).unwrap();
        assert_eq!(next.seq, 4);
        let seqs: Vec<u64> = log.read_all().unwrap().into_iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_torn_trailing_line_is_skipped() {
        let (_temp, log) = setup();
        log.append(EventKind::NotePosted, "A", "note-1", json!({})).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(b"{\"seq\":2,\"at\":").unwrap();

        let next = log.append(EventKind::NotePosted, "A", "note-2", json!({})).unwrap();
        assert_eq!(next.seq, 2);
        let subjects: Vec<String> = log.read_all().unwrap().into_iter().map(|r| r.subject).collect();
        assert_eq!(subjects, vec!["note-1", "note-2"]);
    }
}
