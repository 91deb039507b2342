//! Coordinator - the API surface over the lock store, board and event log
//!
//! Each call takes at most one store lease at a time. Follow-up work (event
//! append, announcement, marking a lock announced) happens after the lease
//! that committed the change is released, and its failures come back as
//! warnings on the otherwise successful result.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::agent::AgentDirectory;
use crate::announce::Announcer;
use crate::board::{Area, Board, BoardStore, NormalizeReport, Note, Status, ThreadSummary};
use crate::clock::{self, SharedClock, system_clock};
use crate::config::Config;
use crate::error::{CoordError, CoordResult};
use crate::events::{EventKind, EventLog, EventRecord};
use crate::locks::{AcquireRequest, Lock, LockFilter, LockStore, PruneReport, ReleaseOutcome, STALE_TEMP_AGE};
use crate::persist;

/// A committed result plus any best-effort follow-up failures
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub result: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> Outcome<T> {
    fn new(result: T) -> Self {
        Self {
            result,
            warnings: Vec::new(),
        }
    }
}

/// Result of a successful acquire
#[derive(Debug, Clone, Serialize)]
pub struct AcquireOutcome {
    pub lock: Lock,
    /// The announcement note, when one was posted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement: Option<Note>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Board document plus each status agent's last heartbeat
#[derive(Debug, Clone, Serialize)]
pub struct BoardView {
    pub board: Board,
    pub heartbeats: BTreeMap<String, Option<DateTime<Utc>>>,
}

/// Defaults applied to requests that leave them unset
#[derive(Debug, Clone)]
struct Policy {
    default_ttl: Option<Duration>,
    retention_days: i64,
    announce: bool,
}

/// Entry point for every coordination operation
pub struct Coordinator {
    root: PathBuf,
    locks: LockStore,
    board: BoardStore,
    events: EventLog,
    agents: AgentDirectory,
    policy: Policy,
}

impl Coordinator {
    /// Open the stores under `config.storage.root` with the system clock
    pub fn open(config: &Config) -> CoordResult<Self> {
        Self::open_with_clock(&config.storage.root, config, system_clock())
    }

    /// Open the stores under `root`, reading time from `clock`
    pub fn open_with_clock(root: impl AsRef<Path>, config: &Config, clock: SharedClock) -> CoordResult<Self> {
        let root = root.as_ref().to_path_buf();
        debug!(?root, "Coordinator::open_with_clock: called");
        fs::create_dir_all(&root).map_err(|e| CoordError::storage(&root, e))?;

        let lease = config.lease_options();
        let locks = LockStore::open(root.join("locks"), lease, clock.clone())?;
        let board = BoardStore::new(root.join("board.json"), lease, clock.clone());
        let events = EventLog::new(root.join("events.jsonl"), lease, clock);
        let agents = AgentDirectory::new(root.join("agents"));

        Ok(Self {
            root,
            locks,
            board,
            events,
            agents,
            policy: Policy {
                default_ttl: config.default_ttl()?,
                retention_days: config.locks.archive_retention_days as i64,
                announce: config.locks.announce,
            },
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &LockStore {
        &self.locks
    }

    pub fn board(&self) -> &BoardStore {
        &self.board
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    // --- locks ---

    /// Create a lock and, unless disabled, announce it on the board
    ///
    /// `announce` of None uses the configured default. A missing TTL takes
    /// the configured default TTL.
    pub fn acquire(&self, mut request: AcquireRequest, announce: Option<bool>) -> CoordResult<AcquireOutcome> {
        debug!(owner = %request.owner, "Coordinator::acquire: called");
        if request.ttl.is_none() {
            request.ttl = self.policy.default_ttl;
        }

        let lock = self.locks.acquire(&request)?;
        let mut warnings = Vec::new();
        self.record(
            EventKind::LockCreated,
            &lock.owner,
            &lock.lock_id,
            json!({ "scope": lock.scope, "mode": lock.mode, "force": lock.force, "expires_at": lock.expires_at }),
            &mut warnings,
        );

        let mut outcome = AcquireOutcome {
            lock,
            announcement: None,
            warnings,
        };
        if announce.unwrap_or(self.policy.announce) {
            outcome.announcement = self.announce(&mut outcome.lock, &mut outcome.warnings);
        }
        Ok(outcome)
    }

    /// Release by id or unique id prefix; idempotent
    pub fn release(&self, reference: &str, actor: &str) -> CoordResult<Outcome<ReleaseOutcome>> {
        let lock_id = self.locks.resolve_id(reference)?;
        let mut outcome = Outcome::new(self.locks.release(&lock_id, actor)?);

        if let ReleaseOutcome::Released(lock) = &outcome.result {
            self.record(EventKind::LockReleased, actor, &lock.lock_id, json!({ "owner": lock.owner }), &mut outcome.warnings);
        }
        Ok(outcome)
    }

    pub fn extend(&self, reference: &str, ttl_minutes: i64, actor: &str) -> CoordResult<Outcome<Lock>> {
        if ttl_minutes <= 0 {
            return Err(CoordError::validation("--ttl-minutes must be positive"));
        }
        let lock_id = self.locks.resolve_id(reference)?;
        let ttl = clock::minutes(ttl_minutes, "--ttl-minutes")?;
        let mut outcome = Outcome::new(self.locks.extend(&lock_id, ttl)?);

        let lock = &outcome.result;
        self.record(EventKind::LockExtended, actor, &lock.lock_id, json!({ "expires_at": lock.expires_at }), &mut outcome.warnings);
        Ok(outcome)
    }

    /// Announce every active lock whose announcement never landed
    pub fn reannounce(&self) -> CoordResult<Outcome<Vec<Lock>>> {
        debug!("Coordinator::reannounce: called");
        let mut outcome = Outcome::new(Vec::new());
        for mut lock in self.locks.active()?.into_iter().filter(|l| !l.announced) {
            if self.announce(&mut lock, &mut outcome.warnings).is_some() {
                outcome.result.push(lock);
            }
        }
        info!(count = outcome.result.len(), "Coordinator::reannounce: complete");
        Ok(outcome)
    }

    pub fn show_lock(&self, reference: &str) -> CoordResult<Lock> {
        let lock_id = self.locks.resolve_id(reference)?;
        self.locks.get(&lock_id)
    }

    pub fn list_locks(&self, filter: &LockFilter) -> CoordResult<Vec<Lock>> {
        self.locks.list(filter)
    }

    pub fn audit(&self, older_than_hours: Option<i64>) -> CoordResult<Vec<Lock>> {
        if older_than_hours.is_some_and(|h| h < 0) {
            return Err(CoordError::validation("--older-than-hours must not be negative"));
        }
        let age = older_than_hours
            .map(|h| clock::hours(h, "--older-than-hours"))
            .transpose()?;
        self.locks.audit(age)
    }

    /// Archive inactive locks; the age defaults to the configured retention
    pub fn prune(&self, older_than_days: Option<i64>, dry_run: bool, actor: &str) -> CoordResult<Outcome<PruneReport>> {
        let days = older_than_days.unwrap_or(self.policy.retention_days);
        let mut outcome = Outcome::new(self.locks.prune(days, dry_run)?);
        // board.json is written through temp files in the root
        outcome.result.temp_files_removed += persist::sweep_temp_files(&self.root, STALE_TEMP_AGE, dry_run)?;

        if !dry_run {
            let ids = outcome.result.lock_ids.clone();
            for lock_id in &ids {
                self.record(EventKind::LockPruned, actor, lock_id, json!({ "older_than_days": days }), &mut outcome.warnings);
            }
        }
        Ok(outcome)
    }

    // --- board ---

    pub fn board_view(&self) -> CoordResult<BoardView> {
        let board = self.board.load()?;
        let heartbeats = board
            .statuses
            .keys()
            .map(|agent| (agent.clone(), self.agents.last_heartbeat(agent)))
            .collect();
        Ok(BoardView { board, heartbeats })
    }

    pub fn set_status(&self, agent: &str, doing: &str, next: &str, tags: &[String]) -> CoordResult<Outcome<Status>> {
        let mut outcome = Outcome::new(self.board.set_status(agent, doing, next, tags)?);
        self.record(EventKind::StatusSet, agent, agent, json!({ "doing": doing, "next": next }), &mut outcome.warnings);
        Ok(outcome)
    }

    /// Post a note; `reply_to` may be a unique id prefix
    pub fn post_note(&self, author: &str, topic: &str, body: &str, reply_to: Option<&str>) -> CoordResult<Outcome<Note>> {
        let parent = reply_to.map(|r| self.board.resolve_note_id(r)).transpose()?;
        let note = self.board.post_note(author, topic, body, parent.as_deref())?;

        let mut outcome = Outcome::new(note);
        let note = &outcome.result;
        self.record(
            EventKind::NotePosted,
            author,
            &note.note_id,
            json!({ "topic": note.topic, "reply_to": note.reply_to }),
            &mut outcome.warnings,
        );
        Ok(outcome)
    }

    pub fn show_note(&self, reference: &str) -> CoordResult<Note> {
        let note_id = self.board.resolve_note_id(reference)?;
        self.board.get_note(&note_id)
    }

    pub fn threads(&self) -> CoordResult<Vec<ThreadSummary>> {
        self.board.list_threads()
    }

    pub fn show_thread(&self, reference: &str) -> CoordResult<Vec<Note>> {
        let note_id = self.board.resolve_note_id(reference)?;
        self.board.get_thread(&note_id)
    }

    pub fn areas(&self) -> CoordResult<BTreeMap<String, Area>> {
        Ok(self.board.load()?.areas)
    }

    pub fn set_area(&self, area: &str, owner: &str, reviewers: &[String], actor: &str) -> CoordResult<Outcome<Area>> {
        let mut outcome = Outcome::new(self.board.set_area(area, owner, reviewers)?);
        self.record(
            EventKind::AreaChanged,
            actor,
            area.trim(),
            json!({ "owner": outcome.result.owner, "reviewers": outcome.result.reviewers }),
            &mut outcome.warnings,
        );
        Ok(outcome)
    }

    pub fn normalize_board(&self, actor: &str) -> CoordResult<Outcome<NormalizeReport>> {
        let mut outcome = Outcome::new(self.board.normalize()?);
        if outcome.result.fixed > 0 {
            self.record(EventKind::BoardNormalized, actor, "board", json!({ "fixed": outcome.result.fixed }), &mut outcome.warnings);
        }
        Ok(outcome)
    }

    // --- events ---

    pub fn recent_events(&self, limit: usize) -> CoordResult<Vec<EventRecord>> {
        self.events.tail(limit)
    }

    /// Post the announcement, then mark the lock announced in its own lease cycle
    fn announce(&self, lock: &mut Lock, warnings: &mut Vec<String>) -> Option<Note> {
        let note = match Announcer::new(&self.board).announce(lock) {
            Ok(note) => note,
            Err(e) => {
                warnings.push(format!("lock {} created but its announcement failed: {}", lock.lock_id, e));
                return None;
            }
        };
        self.record(
            EventKind::NotePosted,
            &lock.owner,
            &note.note_id,
            json!({ "topic": note.topic, "lock_id": lock.lock_id }),
            warnings,
        );

        match self.locks.mark_announced(&lock.lock_id) {
            Ok(()) => lock.announced = true,
            Err(e) => {
                warn!(lock_id = %lock.lock_id, error = %e, "Coordinator::announce: mark failed");
                warnings.push(format!(
                    "announcement {} posted but lock {} could not be marked announced: {}",
                    note.note_id, lock.lock_id, e
                ));
            }
        }
        Some(note)
    }

    /// Append an event; failure becomes a warning
    fn record(&self, kind: EventKind, actor: &str, subject: &str, detail: serde_json::Value, warnings: &mut Vec<String>) {
        if let Err(e) = self.events.append(kind, actor, subject, detail) {
            warn!(%kind, %subject, error = %e, "Coordinator::record: event append failed");
            warnings.push(format!("{} committed but not recorded in the event log: {}", kind, e));
        }
    }
}
