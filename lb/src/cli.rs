//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Leaseboard - file locks and a shared board for cooperating agents
#[derive(Parser, Debug)]
#[command(name = "lb")]
#[command(author, version, about = "Advisory path locks and a shared coordination board", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Storage root (overrides config and LEASEBOARD_ROOT)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Acting agent id (overrides LEASEBOARD_AGENT and config)
    #[arg(short, long, global = true)]
    pub agent: Option<String>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create, release and inspect path locks
    Lock {
        #[command(subcommand)]
        command: LockCommand,
    },

    /// Read and update the shared board
    Board {
        #[command(subcommand)]
        command: BoardCommand,
    },

    /// Show the most recent entries of the event log
    Events {
        /// Number of events to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum LockCommand {
    /// Claim a set of path patterns
    Acquire {
        /// Path patterns (globs allowed)
        #[arg(required = true)]
        scope: Vec<String>,

        /// Lock mode (no-touch, exclusive, or any custom tag)
        #[arg(short, long, default_value = "no-touch")]
        mode: String,

        /// Expire automatically after this many minutes
        #[arg(short, long)]
        ttl_minutes: Option<i64>,

        /// Why the lock is needed (required with --force)
        #[arg(short, long)]
        note: String,

        /// Create even if active locks overlap
        #[arg(long)]
        force: bool,

        /// Do not post an announcement note on the board
        #[arg(long)]
        no_announce: bool,
    },

    /// Release a lock (idempotent)
    Release {
        /// Lock id or unique prefix
        #[arg(required = true)]
        lock_id: String,
    },

    /// List locks
    List {
        /// Only locks whose scope overlaps this path or pattern
        #[arg(short, long)]
        path: Option<String>,

        /// Only locks held by this owner
        #[arg(short, long)]
        owner: Option<String>,

        /// Hide released and expired locks
        #[arg(long)]
        active_only: bool,
    },

    /// Show one lock, active or archived
    Show {
        /// Lock id or unique prefix
        #[arg(required = true)]
        lock_id: String,
    },

    /// Report active locks that never expire
    Audit {
        /// Only locks created at least this many hours ago
        #[arg(long)]
        older_than_hours: Option<i64>,
    },

    /// Archive released and expired locks
    Prune {
        /// Minimum days since the lock became inactive (default: config retention)
        #[arg(long)]
        older_than_days: Option<i64>,

        /// Report what would be archived without moving anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Give an active lock a new expiry
    Extend {
        /// Lock id or unique prefix
        #[arg(required = true)]
        lock_id: String,

        /// New expiry, in minutes from now
        #[arg(short, long)]
        ttl_minutes: i64,
    },

    /// Post announcements for active locks that never got one
    Reannounce,
}

#[derive(Subcommand, Debug)]
pub enum BoardCommand {
    /// Show statuses, threads and areas
    Show,

    /// Set the acting agent's status
    Set {
        #[arg(long, default_value = "")]
        doing: String,

        #[arg(long, default_value = "")]
        next: String,

        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Post a note
    Note {
        /// Topic line, e.g. "[Q] who owns docs/?"
        #[arg(short, long)]
        topic: String,

        /// Note body; "-" reads it from stdin
        #[arg(short, long, default_value = "")]
        body: String,

        /// Note id (or unique prefix) this replies to
        #[arg(short, long)]
        reply_to: Option<String>,
    },

    /// Show one note
    NoteShow {
        /// Note id or unique prefix
        #[arg(required = true)]
        note_id: String,
    },

    /// List thread roots with reply counts
    Threads,

    /// Show the whole thread containing a note
    ThreadShow {
        /// Any note id (or unique prefix) in the thread
        #[arg(required = true)]
        note_id: String,
    },

    /// List area ownership
    Areas,

    /// Set an area's owner and reviewers
    AreaSet {
        /// Area name
        #[arg(required = true)]
        area: String,

        #[arg(long)]
        owner: String,

        /// Comma-separated reviewers
        #[arg(long, value_delimiter = ',')]
        reviewers: Vec<String>,
    },

    /// Assign ids to legacy notes that lack one
    Normalize,
}
