//! End-to-end tests for the `lb` binary

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Workspace {
    temp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            temp.path().join("lb.yml"),
            "lease:\n  timeout-ms: 2000\n  poll-interval-ms: 10\nlocks:\n  announce: true\n",
        )
        .unwrap();
        Self { temp }
    }

    fn root(&self) -> PathBuf {
        self.temp.path().join("store")
    }

    fn lb(&self, agent: &str) -> Command {
        let mut cmd = Command::cargo_bin("lb").unwrap();
        cmd.current_dir(self.temp.path())
            .env("LEASEBOARD_LOG_DIR", self.temp.path().join("logs"))
            .env("LEASEBOARD_ROOT", self.root())
            .env("LEASEBOARD_AGENT", agent)
            .arg("--config")
            .arg(self.temp.path().join("lb.yml"));
        cmd
    }

    /// Run with `--format json` and parse stdout
    fn json(&self, agent: &str, args: &[&str]) -> serde_json::Value {
        let output = self.lb(agent).arg("--format").arg("json").args(args).output().unwrap();
        assert!(output.status.success(), "lb {:?} failed: {}", args, String::from_utf8_lossy(&output.stderr));
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

fn lock_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn test_acquire_then_conflict() {
    let ws = Workspace::new();
    ws.lb("A")
        .args(["lock", "acquire", "pkg/video/**", "--note", "working"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Acquired lock-"));

    ws.lb("B")
        .args(["lock", "acquire", "pkg/video/tools/x", "--note", "fix"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("conflicts").and(predicate::str::contains("working")));

    assert_eq!(lock_files(&ws.root().join("locks")), 1);
}

#[test]
fn test_conflict_as_json_lists_blockers() {
    let ws = Workspace::new();
    let first = ws.json("A", &["lock", "acquire", "a/**", "--note", "x", "--no-announce"]);
    let lock_id = first["lock"]["lock_id"].as_str().unwrap().to_string();

    let output = ws
        .lb("B")
        .args(["--format", "json", "lock", "acquire", "a/b", "--note", "y"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["blocking"][0]["lock_id"], lock_id.as_str());
    assert_eq!(body["blocking"][0]["owner"], "A");
}

#[test]
fn test_release_is_idempotent() {
    let ws = Workspace::new();
    let acquired = ws.json("A", &["lock", "acquire", "docs/a.md", "--note", "x"]);
    let lock_id = acquired["lock"]["lock_id"].as_str().unwrap().to_string();
    assert_eq!(acquired["lock"]["announced"], true);

    ws.lb("A")
        .args(["lock", "release", &lock_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Released"));
    ws.lb("A")
        .args(["lock", "release", &lock_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("already inactive"));

    ws.lb("A").args(["lock", "release", "lock-doesnotexist"]).assert().code(2);
}

#[test]
fn test_force_requires_note() {
    let ws = Workspace::new();
    ws.lb("A")
        .args(["lock", "acquire", "a", "--note", "", "--force"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("note"));
}

#[test]
fn test_list_and_audit_json() {
    let ws = Workspace::new();
    ws.json("A", &["lock", "acquire", "a/**", "--note", "x", "--no-announce"]);
    ws.json("A", &["lock", "acquire", "b", "--note", "y", "--ttl-minutes", "30", "--no-announce"]);

    let listed = ws.json("A", &["lock", "list", "--path", "a/b/c", "--active-only"]);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let audited = ws.json("A", &["lock", "audit"]);
    let audited = audited.as_array().unwrap();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0]["scope"][0], "a/**");

    let pruned = ws.json("A", &["lock", "prune", "--older-than-days", "0", "--dry-run"]);
    assert_eq!(pruned["archived"], 0);
    assert_eq!(pruned["dry_run"], true);
}

#[test]
fn test_board_notes_and_threads() {
    let ws = Workspace::new();
    let question = ws.json("A", &["board", "note", "--topic", "[Q] who owns video?", "--body", "asking"]);
    let question_id = question["note_id"].as_str().unwrap().to_string();

    let answer = ws.json("B", &["board", "note", "--topic", "[A] me", "--reply-to", &question_id]);
    let answer_id = answer["note_id"].as_str().unwrap().to_string();

    let thread = ws.json("C", &["board", "thread-show", &answer_id]);
    let ids: Vec<&str> = thread
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["note_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![question_id.as_str(), answer_id.as_str()]);

    ws.lb("B")
        .args(["board", "note", "--topic", "[A] lost", "--reply-to", "note-missing"])
        .assert()
        .code(2);

    ws.lb("C")
        .args(["board", "threads"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 replies"));
}

#[test]
fn test_board_status_and_areas() {
    let ws = Workspace::new();
    ws.lb("A")
        .args(["board", "set", "--doing", "docs", "--next", "review", "--tags", "docs,review"])
        .assert()
        .success();
    ws.lb("A")
        .args(["board", "area-set", "video", "--owner", "A", "--reviewers", "B,C"])
        .assert()
        .success();

    let view = ws.json("B", &["board", "show"]);
    assert_eq!(view["board"]["statuses"]["A"]["doing"], "docs");
    assert_eq!(view["board"]["statuses"]["A"]["tags"][1], "review");
    assert_eq!(view["board"]["areas"]["video"]["reviewers"][0], "B");

    ws.lb("B")
        .args(["board", "areas"])
        .assert()
        .success()
        .stdout(predicate::str::contains("video"));

    let report = ws.json("A", &["board", "normalize"]);
    assert_eq!(report["fixed"], 0);
}

#[test]
fn test_events_tail() {
    let ws = Workspace::new();
    ws.json("A", &["lock", "acquire", "x", "--note", "x"]);
    ws.json("A", &["board", "set", "--doing", "x"]);

    let events = ws.json("A", &["events", "--limit", "2"]);
    let kinds: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["note-posted", "status-set"]);
}

#[test]
fn test_oversized_durations_exit_with_two() {
    let ws = Workspace::new();
    ws.lb("A")
        .args(["lock", "acquire", "a", "--note", "x", "--ttl-minutes", "1000000000000"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("out of range"));
    ws.lb("A")
        .args(["lock", "prune", "--older-than-days", "1000000000000"])
        .assert()
        .code(2);
    ws.lb("A")
        .args(["lock", "audit", "--older-than-hours", "9223372036854775807"])
        .assert()
        .code(2);

    let acquired = ws.json("A", &["lock", "acquire", "b", "--note", "x", "--no-announce"]);
    let lock_id = acquired["lock"]["lock_id"].as_str().unwrap().to_string();
    ws.lb("A")
        .args(["lock", "extend", &lock_id, "--ttl-minutes", "1000000000000"])
        .assert()
        .code(2);

    let listed = ws.json("A", &["lock", "list"]);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert!(listed[0]["expires_at"].is_null());
}

#[test]
fn test_oversized_default_ttl_is_a_config_error() {
    let ws = Workspace::new();
    fs::write(ws.temp.path().join("lb.yml"), "locks:\n  default-ttl-minutes: 1000000000000\n").unwrap();
    ws.lb("A").args(["lock", "acquire", "a", "--note", "x"]).assert().code(1);
}

#[test]
fn test_busy_store_exits_with_three() {
    let ws = Workspace::new();
    fs::write(
        ws.temp.path().join("lb.yml"),
        "lease:\n  timeout-ms: 100\n  poll-interval-ms: 10\n",
    )
    .unwrap();
    let _held = leaseboard::Lease::acquire(
        &ws.root().join("locks").join(".lease"),
        "test",
        leaseboard::LeaseOptions::default(),
    )
    .unwrap();

    ws.lb("A")
        .args(["lock", "acquire", "a", "--note", "x"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("retry"));
}

#[test]
fn test_invalid_config_is_an_error() {
    let ws = Workspace::new();
    fs::write(ws.temp.path().join("lb.yml"), "lease:\n  timeout-ms: 0\n").unwrap();
    ws.lb("A").args(["lock", "list"]).assert().code(1);
}
