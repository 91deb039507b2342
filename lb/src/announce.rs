//! Board announcements for new locks
//!
//! Best-effort: the lock record is authoritative. A failed post is reported
//! to the caller as a warning and leaves the lock with `announced=false`,
//! which `lock reannounce` can repair later.

use tracing::{debug, warn};

use crate::board::{BoardStore, Note};
use crate::error::CoordResult;
use crate::locks::Lock;

/// Topic tag for lock announcements
pub const LOCK_TOPIC_TAG: &str = "[LOCK]";

/// Posts a note describing a lock
pub struct Announcer<'a> {
    board: &'a BoardStore,
}

impl<'a> Announcer<'a> {
    pub fn new(board: &'a BoardStore) -> Self {
        Self { board }
    }

    /// Post the announcement for `lock`, authored by its owner
    pub fn announce(&self, lock: &Lock) -> CoordResult<Note> {
        debug!(lock_id = %lock.lock_id, "Announcer::announce: called");
        self.board
            .post_note(&lock.owner, &topic(lock), &body(lock), None)
            .inspect_err(|e| warn!(lock_id = %lock.lock_id, error = %e, "Announcer::announce: post failed"))
    }
}

pub fn topic(lock: &Lock) -> String {
    format!("{} {} {}", LOCK_TOPIC_TAG, lock.owner, lock.scope.join(", "))
}

pub fn body(lock: &Lock) -> String {
    let mut body = format!(
        "lock_id: {}\nowner: {}\nmode: {}\nscope:\n",
        lock.lock_id, lock.owner, lock.mode
    );
    for pattern in &lock.scope {
        body.push_str(&format!("  - {}\n", pattern));
    }
    match lock.expires_at {
        Some(exp) => body.push_str(&format!("expires_at: {}\n", exp.to_rfc3339())),
        None => body.push_str("expires_at: never\n"),
    }
    if lock.force {
        body.push_str("force: true\n");
    }
    if !lock.note.is_empty() {
        body.push_str(&format!("note: {}\n", lock.note));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::lease::LeaseOptions;
    use crate::locks::LockMode;
    use chrono::Utc;
    use tempfile::TempDir;

    fn lock() -> Lock {
        Lock {
            lock_id: "lock-abc".to_string(),
            scope: vec!["docs/a.md".to_string(), "src/**".to_string()],
            mode: LockMode::NoTouch,
            owner: "A".to_string(),
            note: "rewriting intro".to_string(),
            created_at: Utc::now(),
            expires_at: None,
            force: false,
            released_at: None,
            released_by: None,
            announced: false,
        }
    }

    #[test]
    fn test_announcement_content() {
        let lock = lock();
        assert_eq!(topic(&lock), "[LOCK] A docs/a.md, src/**");
        let body = body(&lock);
        assert!(body.contains("lock_id: lock-abc"));
        assert!(body.contains("  - src/**"));
        assert!(body.contains("expires_at: never"));
        assert!(body.contains("note: rewriting intro"));
    }

    #[test]
    fn test_announce_posts_note() {
        let temp = TempDir::new().unwrap();
        let board = BoardStore::new(temp.path().join("board.json"), LeaseOptions::default(), system_clock());
        let note = Announcer::new(&board).announce(&lock()).unwrap();

        assert_eq!(note.author, "A");
        assert!(note.topic.starts_with(LOCK_TOPIC_TAG));
        assert_eq!(board.load().unwrap().notes.len(), 1);
    }
}
