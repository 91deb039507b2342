//! The shared board document

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written by this build
pub const BOARD_SCHEMA_VERSION: u32 = 1;

fn schema_version() -> u32 {
    BOARD_SCHEMA_VERSION
}

/// Per-agent status, threaded notes and area ownership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    #[serde(default = "schema_version")]
    pub version: u32,
    #[serde(default)]
    pub statuses: BTreeMap<String, Status>,
    /// In insertion order
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub areas: BTreeMap<String, Area>,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            version: BOARD_SCHEMA_VERSION,
            statuses: BTreeMap::new(),
            notes: Vec::new(),
            areas: BTreeMap::new(),
        }
    }
}

/// What one agent is doing and plans next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub doing: String,
    #[serde(default)]
    pub next: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// A posted note; bodies are opaque text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Empty only for legacy notes written before ids existed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note_id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// Ownership of a named area of the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub owner: String,
    #[serde(default)]
    pub reviewers: Vec<String>,
}

/// A thread root and how many notes reply to it (transitively)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSummary {
    pub root_note_id: String,
    pub topic: String,
    pub author: String,
    pub reply_count: usize,
    pub last_activity: DateTime<Utc>,
}

impl Board {
    /// Check the document's structural invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.version != BOARD_SCHEMA_VERSION {
            return Err(format!(
                "unsupported board schema version {} (expected {})",
                self.version, BOARD_SCHEMA_VERSION
            ));
        }

        if self.statuses.keys().any(|agent| agent.trim().is_empty()) {
            return Err("status entry with an empty agent id".to_string());
        }

        for (name, area) in &self.areas {
            if name.trim().is_empty() {
                return Err("area with an empty name".to_string());
            }
            if area.owner.trim().is_empty() {
                return Err(format!("area {:?} has no owner", name));
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for note in &self.notes {
            if note.topic.trim().is_empty() {
                return Err(format!("note {:?} has an empty topic", note.note_id));
            }
            if note.note_id.is_empty() {
                continue;
            }
            if !seen.insert(note.note_id.as_str()) {
                return Err(format!("duplicate note id {}", note.note_id));
            }
        }

        for note in &self.notes {
            if let Some(parent) = &note.reply_to
                && !seen.contains(parent.as_str())
            {
                return Err(format!(
                    "note {:?} replies to unknown note {}",
                    note.note_id, parent
                ));
            }
        }

        Ok(())
    }

    pub fn find_note(&self, note_id: &str) -> Option<&Note> {
        if note_id.is_empty() {
            return None;
        }
        self.notes.iter().find(|n| n.note_id == note_id)
    }

    /// Follow `reply_to` links up to the thread root
    ///
    /// Returns None for an unknown id. A reply cycle (which validation cannot
    /// rule out in hand-edited files) resolves to the first note revisited.
    pub fn resolve_root(&self, note_id: &str) -> Option<&str> {
        let index = self.index();
        root_in(&index, note_id)
    }

    /// The thread containing `note_id`: root first, then replies in creation order
    pub fn thread(&self, note_id: &str) -> Option<Vec<Note>> {
        let index = self.index();
        let root = root_in(&index, note_id)?;

        let mut thread: Vec<Note> = Vec::new();
        if let Some(root_note) = index.get(root) {
            thread.push((*root_note).clone());
        }
        for note in &self.notes {
            if note.note_id != root && !note.note_id.is_empty() && root_in(&index, &note.note_id) == Some(root) {
                thread.push(note.clone());
            }
        }
        Some(thread)
    }

    /// Every thread root with its transitive reply count, in posting order
    pub fn threads(&self) -> Vec<ThreadSummary> {
        let index = self.index();
        let mut summaries: Vec<ThreadSummary> = Vec::new();
        let mut position: HashMap<&str, usize> = HashMap::new();

        for note in &self.notes {
            if note.note_id.is_empty() {
                continue;
            }
            let Some(root) = root_in(&index, &note.note_id) else {
                continue;
            };

            if root == note.note_id {
                position.insert(root, summaries.len());
                summaries.push(ThreadSummary {
                    root_note_id: note.note_id.clone(),
                    topic: note.topic.clone(),
                    author: note.author.clone(),
                    reply_count: 0,
                    last_activity: note.created_at,
                });
            } else if let Some(&i) = position.get(root) {
                let summary = &mut summaries[i];
                summary.reply_count += 1;
                summary.last_activity = summary.last_activity.max(note.created_at);
            }
        }
        summaries
    }

    fn index(&self) -> HashMap<&str, &Note> {
        self.notes
            .iter()
            .filter(|n| !n.note_id.is_empty())
            .map(|n| (n.note_id.as_str(), n))
            .collect()
    }
}

fn root_in<'a>(index: &HashMap<&'a str, &'a Note>, note_id: &str) -> Option<&'a str> {
    let (mut current, mut note) = index.get_key_value(note_id).map(|(k, v)| (*k, *v))?;
    let mut visited: HashSet<&str> = HashSet::new();

    while let Some(parent) = note.reply_to.as_deref() {
        if !visited.insert(current) {
            break;
        }
        match index.get_key_value(parent) {
            Some((k, v)) => {
                current = *k;
                note = *v;
            }
            // Dangling parent: treat the orphan as its own root
            None => break,
        }
    }
    Some(current)
}
