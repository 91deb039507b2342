//! Lease-guarded board persistence
//!
//! Every mutator runs one cycle under the board lease:
//! read the current document, apply one change, validate, atomically replace,
//! release. Readers skip the lease and always see the last complete write.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::model::{Area, Board, Note, Status, ThreadSummary};
use crate::clock::SharedClock;
use crate::error::{CoordError, CoordResult};
use crate::id;
use crate::lease::{Lease, LeaseOptions};
use crate::persist;

/// Result of a normalize pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct NormalizeReport {
    pub fixed: usize,
}

/// The board document and its lease
pub struct BoardStore {
    path: PathBuf,
    lease_path: PathBuf,
    lease: LeaseOptions,
    clock: SharedClock,
}

impl BoardStore {
    /// `path` is the document; its lease sentinel sits next to it
    pub fn new(path: impl Into<PathBuf>, lease: LeaseOptions, clock: SharedClock) -> Self {
        let path = path.into();
        let lease_path = path.with_extension("lease");
        debug!(?path, "BoardStore::new: called");
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

    /// Read the current document without taking the lease
    ///
    /// A missing document reads as an empty board.
    pub fn load(&self) -> CoordResult<Board> {
        debug!(path = ?self.path, "BoardStore::load: called");
        let board: Board = persist::read_json(&self.path)?.unwrap_or_default();
        board
            .validate()
            .map_err(|reason| CoordError::corrupt(&self.path, reason))?;
        Ok(board)
    }

    /// Run one read-modify-write cycle under the lease
    ///
    /// If `apply` or validation fails nothing is written.
    fn mutate<T>(&self, op: &str, apply: impl FnOnce(&mut Board, DateTime<Utc>) -> CoordResult<T>) -> CoordResult<T> {
        let _lease = Lease::acquire(&self.lease_path, "board", self.lease)?;
        let now = self.clock.now();

        let mut board = self.load()?;
        let out = apply(&mut board, now)?;
        board.validate().map_err(|reason| {
            CoordError::validation(format!("{} would leave the board invalid: {}", op, reason))
        })?;
        persist::write_json_atomic(&self.path, &board)?;

        debug!(op, "BoardStore::mutate: committed");
        Ok(out)
    }

    /// Replace one agent's status entry
    pub fn set_status(&self, agent_id: &str, doing: &str, next: &str, tags: &[String]) -> CoordResult<Status> {
        debug!(%agent_id, "BoardStore::set_status: called");
        let agent_id = agent_id.trim();
        if agent_id.is_empty() {
            return Err(CoordError::validation("agent id must not be empty"));
        }

        let tags: Vec<String> = tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let status = self.mutate("set-status", |board, now| {
            let status = Status {
                doing: doing.trim().to_string(),
                next: next.trim().to_string(),
                tags,
                updated_at: now,
            };
            board.statuses.insert(agent_id.to_string(), status.clone());
            Ok(status)
        })?;
        info!(%agent_id, "BoardStore::set_status: updated");
        Ok(status)
    }

    /// Append a note, validating `reply_to` first
    pub fn post_note(&self, author: &str, topic: &str, body: &str, reply_to: Option<&str>) -> CoordResult<Note> {
        debug!(%author, %topic, ?reply_to, "BoardStore::post_note: called");
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(CoordError::validation("note topic must not be empty"));
        }
        if author.trim().is_empty() {
            return Err(CoordError::validation("note author must not be empty"));
        }

        let note = self.mutate("post-note", |board, now| {
            if let Some(parent) = reply_to
                && board.find_note(parent).is_none()
            {
                return Err(CoordError::NotFound {
                    kind: "Reply target note",
                    id: parent.to_string(),
                });
            }

            let note = Note {
                note_id: id::generate_id("note"),
                topic: topic.to_string(),
                body: body.to_string(),
                author: author.trim().to_string(),
                created_at: now,
                reply_to: reply_to.map(str::to_string),
            };
            board.notes.push(note.clone());
            Ok(note)
        })?;
        info!(note_id = %note.note_id, "BoardStore::post_note: posted");
        Ok(note)
    }

    pub fn get_note(&self, note_id: &str) -> CoordResult<Note> {
        debug!(%note_id, "BoardStore::get_note: called");
        self.load()?.find_note(note_id).cloned().ok_or_else(|| note_not_found(note_id))
    }

    pub fn list_threads(&self) -> CoordResult<Vec<ThreadSummary>> {
        debug!("BoardStore::list_threads: called");
        Ok(self.load()?.threads())
    }

    /// Root first, then replies in creation order; `note_id` may be any note in the thread
    pub fn get_thread(&self, note_id: &str) -> CoordResult<Vec<Note>> {
        debug!(%note_id, "BoardStore::get_thread: called");
        self.load()?.thread(note_id).ok_or_else(|| note_not_found(note_id))
    }

    /// Create or replace an area's ownership
    pub fn set_area(&self, area: &str, owner: &str, reviewers: &[String]) -> CoordResult<Area> {
        debug!(%area, %owner, "BoardStore::set_area: called");
        let area = area.trim();
        if area.is_empty() {
            return Err(CoordError::validation("area name must not be empty"));
        }
        if owner.trim().is_empty() {
            return Err(CoordError::validation("area owner must not be empty"));
        }

        let reviewers: Vec<String> = reviewers
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();

        self.mutate("set-area", |board, _now| {
            let entry = Area {
                owner: owner.trim().to_string(),
                reviewers,
            };
            board.areas.insert(area.to_string(), entry.clone());
            Ok(entry)
        })
    }

    /// Assign ids to legacy notes that lack one; changes nothing else
    pub fn normalize(&self) -> CoordResult<NormalizeReport> {
        debug!("BoardStore::normalize: called");
        let report = self.mutate("normalize", |board, _now| {
            let mut fixed = 0;
            for note in board.notes.iter_mut().filter(|n| n.note_id.is_empty()) {
                note.note_id = id::generate_id("note");
                fixed += 1;
            }
            Ok(NormalizeReport { fixed })
        })?;
        info!(fixed = report.fixed, "BoardStore::normalize: complete");
        Ok(report)
    }

    /// Resolve a full note id or unique prefix
    pub fn resolve_note_id(&self, reference: &str) -> CoordResult<String> {
        let board = self.load()?;
        id::resolve(
            "Note",
            reference,
            board
                .notes
                .iter()
                .filter(|n| !n.note_id.is_empty())
                .map(|n| n.note_id.as_str()),
        )
    }
}

fn note_not_found(note_id: &str) -> CoordError {
    CoordError::NotFound {
        kind: "Note",
        id: note_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BoardStore) {
        let temp = TempDir::new().unwrap();
        let store = BoardStore::new(temp.path().join("board.json"), LeaseOptions::default(), system_clock());
        (temp, store)
    }

    #[test]
    fn test_empty_board_when_missing() {
        let (_temp, store) = setup();
        let board = store.load().unwrap();
        assert!(board.notes.is_empty());
        assert!(board.statuses.is_empty());
    }

    #[test]
    fn test_set_status_replaces_only_that_agent() {
        let (_temp, store) = setup();
        store.set_status("a", "writing docs", "review", &["docs".to_string()]).unwrap();
        store.set_status("b", "video", "audio", &[]).unwrap();
        store.set_status("a", "reviewing", "", &[" ".to_string()]).unwrap();

        let board = store.load().unwrap();
        assert_eq!(board.statuses.len(), 2);
        assert_eq!(board.statuses["a"].doing, "reviewing");
        assert!(board.statuses["a"].tags.is_empty());
        assert_eq!(board.statuses["b"].doing, "video");
    }

    #[test]
    fn test_reply_thread() {
        let (_temp, store) = setup();
        let n1 = store.post_note("A", "[Q] x", "...", None).unwrap();
        let n2 = store.post_note("B", "[A]", "...", Some(&n1.note_id)).unwrap();
        let n3 = store.post_note("C", "[A] more", "...", Some(&n2.note_id)).unwrap();

        let thread: Vec<String> = store.get_thread(&n2.note_id).unwrap().into_iter().map(|n| n.note_id).collect();
        assert_eq!(thread, vec![n1.note_id.clone(), n2.note_id.clone(), n3.note_id.clone()]);

        let threads = store.list_threads().unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].root_note_id, n1.note_id);
        assert_eq!(threads[0].reply_count, 2);

        assert_eq!(store.get_note(&n3.note_id).unwrap().reply_to, Some(n2.note_id));
    }

    #[test]
    fn test_reply_to_unknown_note_is_rejected() {
        let (_temp, store) = setup();
        let err = store.post_note("A", "[A]", "...", Some("note-ghost")).unwrap_err();
        assert!(matches!(err, CoordError::NotFound { .. }));
        assert!(store.load().unwrap().notes.is_empty());
        assert!(matches!(
            store.post_note("A", "  ", "...", None),
            Err(CoordError::Validation(_))
        ));
    }

    #[test]
    fn test_areas_upsert() {
        let (_temp, store) = setup();
        store.set_area("video", "a", &["b".to_string()]).unwrap();
        store.set_area("video", "c", &[]).unwrap();

        let board = store.load().unwrap();
        assert_eq!(board.areas.len(), 1);
        assert_eq!(board.areas["video"].owner, "c");
        assert!(store.set_area("video", " ", &[]).is_err());
    }

    #[test]
    fn test_normalize_assigns_missing_ids() {
        let (_temp, store) = setup();
        fs::write(
            store.path(),
            r#"{"version":1,"notes":[{"topic":"[FYI] a","body":"x","author":"b"},{"note_id":"note-keep","topic":"[FYI] b","body":"y","author":"c"}]}"#,
        )
        .unwrap();

        assert_eq!(store.normalize().unwrap().fixed, 1);
        let board = store.load().unwrap();
        assert!(board.notes.iter().all(|n| !n.note_id.is_empty()));
        assert_eq!(board.notes[1].note_id, "note-keep");
        assert_eq!(board.notes[0].body, "x");

        assert_eq!(store.normalize().unwrap().fixed, 0);
    }

    #[test]
    fn test_document_round_trips_byte_for_byte() {
        let (_temp, store) = setup();
        store.set_status("a", "x", "y", &["t".to_string()]).unwrap();
        let n1 = store.post_note("a", "[Q] q", "multi\nline \"body\"", None).unwrap();
        store.post_note("b", "[A] a", "", Some(&n1.note_id)).unwrap();
        store.set_area("docs", "a", &["b".to_string()]).unwrap();

        let raw = fs::read(store.path()).unwrap();
        let board: Board = serde_json::from_slice(&raw).unwrap();
        assert!(board.validate().is_ok());
        let mut again = serde_json::to_vec_pretty(&board).unwrap();
        again.push(b'\n');
        assert_eq!(raw, again);
    }

    #[test]
    fn test_corrupt_board_is_reported_not_overwritten() {
        let (_temp, store) = setup();
        fs::write(store.path(), "{\"version\": 1, \"notes\": [").unwrap();

        assert!(matches!(store.load(), Err(CoordError::Corrupt { .. })));
        assert!(matches!(
            store.set_status("a", "x", "y", &[]),
            Err(CoordError::Corrupt { .. })
        ));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{\"version\": 1, \"notes\": [");
    }

    #[test]
    fn test_resolve_note_prefix() {
        let (_temp, store) = setup();
        let note = store.post_note("a", "[Q] q", "", None).unwrap();
        let short = &note.note_id["note-".len().."note-".len() + 20];
        assert_eq!(store.resolve_note_id(short).unwrap(), note.note_id);
    }
}
