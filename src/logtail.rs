//! Log-tail watcher: alternate usage-limit detection.
//!
//! Instead of pattern-matching the PTY byte stream, this watcher follows
//! the structured JSONL session log Claude Code writes under
//! `~/.claude/projects/<sanitized-cwd>/`. It attaches at end-of-file so
//! events from before the session never fire, polls for appended lines,
//! and survives the file being rotated or deleted by re-resolving the
//! newest log.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::trigger::{TriggerSet, TriggerSignal};

/// Poll interval for appended lines.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One line of the session log. Unknown fields are kept for matching.
#[derive(Debug, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub rest: serde_json::Value,
}

/// Map a working directory to Claude Code's per-project log directory
/// name: every non-alphanumeric character becomes `-`.
pub fn sanitize_project_path(cwd: &Path) -> String {
    cwd.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// `~/.claude/projects/<sanitized-cwd>` for the given working directory.
pub fn project_log_dir(cwd: &Path) -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".claude")
            .join("projects")
            .join(sanitize_project_path(cwd))
    })
}

/// The most recently modified `.jsonl` file in the log directory, if any.
/// A momentarily absent directory is a recoverable condition.
pub fn locate_active_log(log_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(log_dir).ok()?;
    entries
        .flatten()
        .filter(|entry| {
            entry.path().extension().and_then(|s| s.to_str()) == Some("jsonl")
        })
        .max_by_key(|entry| {
            // Path as tie-breaker keeps the choice stable when mtimes are
            // equal, so the follower does not flip between files.
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            (modified, entry.path())
        })
        .map(|entry| entry.path())
}

/// Follower state for one log directory.
pub struct LogTail {
    log_dir: PathBuf,
    path: Option<PathBuf>,
    position: u64,
}

impl LogTail {
    /// Attach to the directory. If a log already exists, the follow
    /// position starts at its current end so old events never re-fire.
    pub fn new(log_dir: PathBuf) -> Self {
        let mut tail = Self {
            log_dir,
            path: None,
            position: 0,
        };
        if let Some(path) = locate_active_log(&tail.log_dir) {
            tail.position = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            tail.path = Some(path);
        }
        tail
    }

    /// One poll step: pick up rotation, then consume appended lines and
    /// evaluate each parsed event. Transient I/O problems are absorbed.
    pub fn poll_once(&mut self, triggers: &TriggerSet, signal: &TriggerSignal) {
        self.resolve_current();

        let Some(path) = self.path.clone() else {
            return;
        };
        let Ok(file) = File::open(&path) else {
            // Deleted between resolve and open; next poll re-resolves.
            self.path = None;
            return;
        };

        let mut reader = BufReader::new(file);
        if reader.seek(SeekFrom::Start(self.position)).is_err() {
            return;
        }

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(n) => {
                    // Only advance past complete lines; a partially
                    // flushed line is re-read on the next poll.
                    if !line.ends_with('\n') {
                        break;
                    }
                    self.position += n as u64;
                    self.evaluate_line(line.trim_end(), triggers, signal);
                }
                Err(_) => break,
            }
        }
    }

    /// Re-resolve the active log when the current one was rotated,
    /// truncated, or never found.
    fn resolve_current(&mut self) {
        let rotated = match &self.path {
            None => true,
            Some(path) => match std::fs::metadata(path) {
                Ok(meta) => meta.len() < self.position,
                Err(_) => true,
            },
        };
        if !rotated {
            // A newer log file supersedes the one being followed.
            if let Some(newest) = locate_active_log(&self.log_dir) {
                if Some(&newest) != self.path.as_ref() {
                    debug!(path = %newest.display(), "following newer session log");
                    self.path = Some(newest);
                    self.position = 0;
                }
            }
            return;
        }

        self.path = locate_active_log(&self.log_dir);
        self.position = 0;
        if let Some(path) = &self.path {
            debug!(path = %path.display(), "re-resolved session log after rotation");
        }
    }

    fn evaluate_line(&self, line: &str, triggers: &TriggerSet, signal: &TriggerSignal) {
        if line.is_empty() {
            return;
        }
        let fired = match serde_json::from_str::<LogEvent>(line) {
            Ok(event) => {
                trace!(kind = ?event.kind, ts = ?event.timestamp, "log event");
                triggers.matches_event(&event.rest)
            }
            // Not valid JSON; fall back to plain text matching so a
            // malformed log line cannot hide a limit message.
            Err(_) => triggers.matches_chunk(line),
        };
        if fired && signal.raise() {
            debug!("usage-limit trigger matched in session log");
        }
    }
}

/// Handle to the background log-tail thread.
pub struct LogTailHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LogTailHandle {
    pub fn stop(&mut self, timeout: Duration) {
        self.running.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        while let Some(thread) = &self.thread {
            if thread.is_finished() {
                let _ = self.thread.take().map(JoinHandle::join);
                return;
            }
            if Instant::now() >= deadline {
                self.thread.take();
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Spawn the background follower over the project log dir for `cwd`.
pub fn spawn_log_tail(
    log_dir: PathBuf,
    triggers: TriggerSet,
    signal: Arc<TriggerSignal>,
) -> LogTailHandle {
    let running = Arc::new(AtomicBool::new(true));
    let thread_running = running.clone();

    let thread = thread::spawn(move || {
        let mut tail = LogTail::new(log_dir);
        while thread_running.load(Ordering::SeqCst) {
            tail.poll_once(&triggers, &signal);
            thread::sleep(POLL_INTERVAL);
        }
    });

    LogTailHandle {
        running,
        thread: Some(thread),
    }
}
