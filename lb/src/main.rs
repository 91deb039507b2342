use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use leaseboard::agent::resolve_agent_id;
use leaseboard::cli::{BoardCommand, Cli, Command, LockCommand, OutputFormat};
use leaseboard::{AcquireRequest, Config, CoordError, Coordinator, Lock, LockFilter, LockMode, Note, ReleaseOutcome};

/// Directory override for the log file
const LOG_DIR_ENV: &str = "LEASEBOARD_LOG_DIR";

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("leaseboard")
            .join("logs"),
    };

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Many short-lived processes share one log, so append
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("leaseboard.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.format;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => match report.downcast_ref::<CoordError>() {
            Some(err) => {
                report_error(err, format);
                ExitCode::from(err.exit_code())
            }
            None => {
                eprintln!("{} {:#}", "error:".red().bold(), report);
                ExitCode::from(1)
            }
        },
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.apply_env();
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    let agent = resolve_agent_id(cli.agent.as_deref(), &config);
    info!(%agent, root = %config.storage.root.display(), "lb starting");

    let coord = Coordinator::open(&config)?;
    let out = Output { format: cli.format };

    debug!(command = ?cli.command, "run: dispatching command");
    match cli.command {
        Command::Lock { command } => run_lock(&coord, &out, &agent, command),
        Command::Board { command } => run_board(&coord, &out, &agent, command),
        Command::Events { limit } => {
            let events = coord.recent_events(limit)?;
            out.emit(&events, || {
                if events.is_empty() {
                    println!("No events recorded");
                }
                for e in &events {
                    println!(
                        "{:>6} {} {:<16} {} {}",
                        e.seq.to_string().dimmed(),
                        format_time(e.at),
                        e.kind.to_string().yellow(),
                        e.actor.cyan(),
                        e.subject
                    );
                }
            })
        }
    }
}

fn run_lock(coord: &Coordinator, out: &Output, agent: &str, command: LockCommand) -> Result<()> {
    let now = coord.locks().now();
    match command {
        LockCommand::Acquire {
            scope,
            mode,
            ttl_minutes,
            note,
            force,
            no_announce,
        } => {
            let mode: LockMode = mode.parse().map_err(CoordError::Validation)?;
            let mut request = AcquireRequest::new(scope, agent, note).with_mode(mode);
            if let Some(minutes) = ttl_minutes {
                if minutes <= 0 {
                    return Err(CoordError::validation("--ttl-minutes must be positive").into());
                }
                request = request.with_ttl(leaseboard::clock::minutes(minutes, "--ttl-minutes")?);
            }
            if force {
                request = request.forced();
            }

            let announce = if no_announce { Some(false) } else { None };
            let outcome = coord.acquire(request, announce)?;
            print_warnings(&outcome.warnings);
            out.emit(&outcome, || {
                println!("{} Acquired {}", "✓".green(), outcome.lock.lock_id.cyan());
                if let Some(note) = &outcome.announcement {
                    println!("  announced as {}", note.note_id.dimmed());
                }
            })
        }
        LockCommand::Release { lock_id } => {
            let outcome = coord.release(&lock_id, agent)?;
            print_warnings(&outcome.warnings);
            out.emit(&outcome.result, || match &outcome.result {
                ReleaseOutcome::Released(lock) => println!("{} Released {}", "✓".green(), lock.lock_id.cyan()),
                ReleaseOutcome::AlreadyInactive(lock) => {
                    println!("{} {} was already inactive", "✓".green(), lock.lock_id.cyan())
                }
            })
        }
        LockCommand::List {
            path,
            owner,
            active_only,
        } => {
            let locks = coord.list_locks(&LockFilter {
                active_only,
                path,
                owner,
            })?;
            out.emit(&locks, || {
                if locks.is_empty() {
                    println!("No locks");
                }
                for lock in &locks {
                    print_lock_line(lock, now);
                }
            })
        }
        LockCommand::Show { lock_id } => {
            let lock = coord.show_lock(&lock_id)?;
            out.emit(&lock, || print_lock_detail(&lock, now))
        }
        LockCommand::Audit { older_than_hours } => {
            let locks = coord.audit(older_than_hours)?;
            out.emit(&locks, || {
                if locks.is_empty() {
                    println!("No active locks without an expiry");
                    return;
                }
                println!("{} active lock(s) never expire:", locks.len().to_string().yellow());
                for lock in &locks {
                    print_lock_line(lock, now);
                }
            })
        }
        LockCommand::Prune {
            older_than_days,
            dry_run,
        } => {
            let outcome = coord.prune(older_than_days, dry_run, agent)?;
            print_warnings(&outcome.warnings);
            let report = &outcome.result;
            out.emit(report, || {
                let verb = if report.dry_run { "Would archive" } else { "Archived" };
                println!("{} {} lock(s)", verb, report.archived);
                for id in &report.lock_ids {
                    println!("  {}", id.dimmed());
                }
                if report.temp_files_removed > 0 {
                    let verb = if report.dry_run { "Would remove" } else { "Removed" };
                    println!("{} {} abandoned temp file(s)", verb, report.temp_files_removed);
                }
            })
        }
        LockCommand::Extend { lock_id, ttl_minutes } => {
            let outcome = coord.extend(&lock_id, ttl_minutes, agent)?;
            print_warnings(&outcome.warnings);
            let lock = &outcome.result;
            out.emit(lock, || {
                let expires = lock.expires_at.map(format_time).unwrap_or_else(|| "never".to_string());
                println!("{} {} now expires at {}", "✓".green(), lock.lock_id.cyan(), expires);
            })
        }
        LockCommand::Reannounce => {
            let outcome = coord.reannounce()?;
            print_warnings(&outcome.warnings);
            out.emit(&outcome.result, || {
                println!("Announced {} lock(s)", outcome.result.len());
                for lock in &outcome.result {
                    println!("  {}", lock.lock_id.dimmed());
                }
            })
        }
    }
}

fn run_board(coord: &Coordinator, out: &Output, agent: &str, command: BoardCommand) -> Result<()> {
    match command {
        BoardCommand::Show => {
            let view = coord.board_view()?;
            let threads = view.board.threads();
            out.emit(&view, || {
                println!("{}", "Statuses".bold());
                if view.board.statuses.is_empty() {
                    println!("  (none)");
                }
                for (agent_id, status) in &view.board.statuses {
                    let beat = view
                        .heartbeats
                        .get(agent_id)
                        .copied()
                        .flatten()
                        .map(format_time)
                        .unwrap_or_else(|| "-".to_string());
                    println!("  {} (updated {}, heartbeat {})", agent_id.cyan(), format_time(status.updated_at), beat);
                    println!("    doing: {}", status.doing);
                    println!("    next:  {}", status.next);
                    if !status.tags.is_empty() {
                        println!("    tags:  {}", status.tags.join(", "));
                    }
                }

                println!("{}", "Threads".bold());
                if threads.is_empty() {
                    println!("  (none)");
                }
                for t in &threads {
                    println!("  {} {} ({}, {} replies)", t.root_note_id.dimmed(), t.topic, t.author, t.reply_count);
                }

                println!("{}", "Areas".bold());
                if view.board.areas.is_empty() {
                    println!("  (none)");
                }
                for (name, area) in &view.board.areas {
                    println!("  {}: {} (reviewers: {})", name.cyan(), area.owner, area.reviewers.join(", "));
                }
            })
        }
        BoardCommand::Set { doing, next, tags } => {
            let outcome = coord.set_status(agent, &doing, &next, &tags)?;
            print_warnings(&outcome.warnings);
            out.emit(&outcome.result, || println!("{} Status updated for {}", "✓".green(), agent.cyan()))
        }
        BoardCommand::Note { topic, body, reply_to } => {
            let body = if body == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf).context("Failed to read note body from stdin")?;
                buf
            } else {
                body
            };
            let outcome = coord.post_note(agent, &topic, &body, reply_to.as_deref())?;
            print_warnings(&outcome.warnings);
            out.emit(&outcome.result, || {
                println!("{} Posted {}", "✓".green(), outcome.result.note_id.cyan())
            })
        }
        BoardCommand::NoteShow { note_id } => {
            let note = coord.show_note(&note_id)?;
            out.emit(&note, || print_note(&note))
        }
        BoardCommand::Threads => {
            let threads = coord.threads()?;
            out.emit(&threads, || {
                if threads.is_empty() {
                    println!("No threads");
                }
                for t in &threads {
                    println!(
                        "{} {} ({}, {} replies, last {})",
                        t.root_note_id.cyan(),
                        t.topic,
                        t.author,
                        t.reply_count,
                        format_time(t.last_activity)
                    );
                }
            })
        }
        BoardCommand::ThreadShow { note_id } => {
            let thread = coord.show_thread(&note_id)?;
            out.emit(&thread, || {
                for (i, note) in thread.iter().enumerate() {
                    if i > 0 {
                        println!();
                    }
                    print_note(note);
                }
            })
        }
        BoardCommand::Areas => {
            let areas = coord.areas()?;
            out.emit(&areas, || {
                if areas.is_empty() {
                    println!("No areas");
                }
                for (name, area) in &areas {
                    println!("{}: {} (reviewers: {})", name.cyan(), area.owner, area.reviewers.join(", "));
                }
            })
        }
        BoardCommand::AreaSet { area, owner, reviewers } => {
            let outcome = coord.set_area(&area, &owner, &reviewers, agent)?;
            print_warnings(&outcome.warnings);
            out.emit(&outcome.result, || {
                println!("{} {} owned by {}", "✓".green(), area.trim().cyan(), outcome.result.owner)
            })
        }
        BoardCommand::Normalize => {
            let outcome = coord.normalize_board(agent)?;
            print_warnings(&outcome.warnings);
            out.emit(&outcome.result, || {
                println!("Assigned ids to {} note(s)", outcome.result.fixed)
            })
        }
    }
}

struct Output {
    format: OutputFormat,
}

impl Output {
    /// Print `value` as JSON, or run `text` for human output
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
            }
            OutputFormat::Text => text(),
        }
        Ok(())
    }
}

fn report_error(err: &CoordError, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let blocking = match err {
                CoordError::Conflict { blocking, .. } => blocking.clone(),
                _ => Vec::new(),
            };
            let body = serde_json::json!({
                "error": err.to_string(),
                "exit_code": err.exit_code(),
                "retryable": err.is_retryable(),
                "blocking": blocking,
            });
            println!("{}", body);
        }
        OutputFormat::Text => eprintln!("{} {}", "error:".red().bold(), err),
    }
}

fn print_warnings(warnings: &[String]) {
    for w in warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), w);
    }
}

fn lock_state(lock: &Lock, now: DateTime<Utc>) -> ColoredString {
    if lock.released_at.is_some() {
        "released".dimmed()
    } else if lock.is_active(now) {
        "active".green()
    } else {
        "expired".dimmed()
    }
}

fn print_lock_line(lock: &Lock, now: DateTime<Utc>) {
    println!(
        "{} [{}] {} {} [{}] {}",
        lock.lock_id.cyan(),
        lock_state(lock, now),
        lock.owner,
        lock.mode,
        lock.scope.join(", "),
        lock.note.dimmed()
    );
}

fn print_lock_detail(lock: &Lock, now: DateTime<Utc>) {
    println!("{} [{}]", lock.lock_id.cyan(), lock_state(lock, now));
    println!("  owner:     {}", lock.owner);
    println!("  mode:      {}", lock.mode);
    println!("  scope:     {}", lock.scope.join(", "));
    println!("  note:      {}", lock.note);
    println!("  created:   {}", format_time(lock.created_at));
    println!(
        "  expires:   {}",
        lock.expires_at.map(format_time).unwrap_or_else(|| "never".to_string())
    );
    if lock.force {
        println!("  forced:    yes");
    }
    if let Some(at) = lock.released_at {
        println!(
            "  released:  {} by {}",
            format_time(at),
            lock.released_by.as_deref().unwrap_or("?")
        );
    }
    println!("  announced: {}", if lock.announced { "yes" } else { "no" });
}

fn print_note(note: &Note) {
    println!("{} {}", note.note_id.cyan(), note.topic.bold());
    println!("  by {} at {}", note.author, format_time(note.created_at));
    if let Some(parent) = &note.reply_to {
        println!("  in reply to {}", parent.dimmed());
    }
    if !note.body.is_empty() {
        for line in note.body.lines() {
            println!("  | {}", line);
        }
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%SZ").to_string()
}
