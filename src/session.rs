//! Session controller: the foreground event loop and mode switching.
//!
//! Owns the terminal raw-mode lifecycle and the current child handle.
//! The loop ticks every 10ms: liveness check, trigger check, input
//! forwarding, geometry propagation. A raised trigger restores the
//! terminal, optionally asks for confirmation, restarts the child with
//! the API credential injected, and re-enters raw mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use crossterm::tty::IsTty;
use portable_pty::PtySize;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, Detection};
use crate::logtail::{project_log_dir, spawn_log_tail, LogTailHandle};
use crate::notify::Notifier;
use crate::process::{ChildHandle, ChildStatus, Supervisor};
use crate::pty::{terminal_size, SupervisedCommand};
use crate::trigger::TriggerSignal;
use crate::watcher::{relay_chunk, OutputSink};

/// Loop tick; bounds input-forwarding latency.
const TICK: Duration = Duration::from_millis(10);

/// Bounded wait for the log-tail thread during shutdown.
const LOG_TAIL_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Billing mode of the current child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Subscription,
    Api,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Subscription => "subscription",
            Mode::Api => "api",
        }
    }
}

/// How the session ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The child ended on its own; carries its exit code when known.
    ChildExited(Option<u32>),
    /// The user declined the mode switch.
    SwitchDeclined,
    /// The user interrupted the session.
    Interrupted,
}

/// User-visible session failures, distinct from a normal session end.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The mode switch terminated the old child but the replacement
    /// failed to spawn; the user's session is unexpectedly gone.
    #[error("mode switch failed after stopping the session: {0:#}")]
    RestartFailed(#[source] anyhow::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Capability over terminal raw mode, so save/restore balance is
/// testable without a tty.
pub trait TermMode: Send {
    fn enter_raw(&mut self) -> Result<()>;
    fn restore(&mut self) -> Result<()>;
}

/// Production raw-mode handling via crossterm. A non-tty stdin (pipes,
/// tests) skips raw mode entirely.
#[derive(Debug, Default)]
pub struct CrosstermMode {
    raw_active: bool,
}

impl TermMode for CrosstermMode {
    fn enter_raw(&mut self) -> Result<()> {
        if !std::io::stdin().is_tty() {
            return Ok(());
        }
        crossterm::terminal::enable_raw_mode()?;
        self.raw_active = true;
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        if self.raw_active {
            crossterm::terminal::disable_raw_mode()?;
            self.raw_active = false;
        }
        Ok(())
    }
}

/// Capability for the switch confirmation answer. The question itself is
/// emitted through the output sink before this is called.
pub trait Prompter: Send {
    /// Collect the answer; anything other than an explicit yes declines.
    fn confirm(&mut self, input: &Receiver<Vec<u8>>) -> bool;
}

/// Reads the answer line from the session's own input channel. The stdin
/// reader thread stays the terminal's only reader; opening `/dev/tty` here
/// would race it for the same device and lose the answer.
#[derive(Debug, Default)]
pub struct LinePrompter;

impl Prompter for LinePrompter {
    fn confirm(&mut self, input: &Receiver<Vec<u8>>) -> bool {
        let mut line = Vec::new();
        loop {
            match input.recv() {
                Ok(bytes) => {
                    line.extend_from_slice(&bytes);
                    if let Some(end) = line.iter().position(|&b| b == b'\n' || b == b'\r') {
                        let answer = String::from_utf8_lossy(&line[..end]);
                        return answer.trim().eq_ignore_ascii_case("y");
                    }
                }
                // Input channel closed (stdin EOF): decline.
                Err(_) => return false,
            }
        }
    }
}

/// Everything the session needs from the outside world, passed in as
/// capabilities rather than ambient state.
pub struct SessionIo {
    /// User keystrokes, fed by a stdin reader thread or a test script.
    pub input: Receiver<Vec<u8>>,
    pub term: Box<dyn TermMode>,
    pub prompter: Box<dyn Prompter>,
    pub notifier: Box<dyn Notifier>,
    /// Set by the ctrlc handler (or a test) to end the session.
    pub interrupt: Arc<AtomicBool>,
}

enum SwitchOutcome {
    Continued(ChildHandle),
    Declined,
}

/// One supervised session: spawn, relay, detect, switch, shut down.
pub struct Session {
    config: Config,
    supervisor: Supervisor,
    signal: Arc<TriggerSignal>,
    mode: Mode,
    io: SessionIo,
    sink: OutputSink,
    log_tail: Option<LogTailHandle>,
}

impl Session {
    pub fn new(config: Config, command: SupervisedCommand, sink: OutputSink, io: SessionIo) -> Self {
        let signal = Arc::new(TriggerSignal::new());
        // In log-tail mode the PTY watcher only relays; detection runs on
        // the structured session log.
        let stream_triggers = match config.detection {
            Detection::Pty => Some(config.trigger_set()),
            Detection::Log => None,
        };
        let supervisor = Supervisor::new(command, sink.clone(), signal.clone(), stream_triggers);
        Self {
            config,
            supervisor,
            signal,
            mode: Mode::Subscription,
            io,
            sink,
            log_tail: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Session status lines share the relay sink, so they can never
    /// interleave with child output mid-escape-sequence and tests can
    /// observe them.
    fn emit(&self, text: &str) {
        relay_chunk(text.as_bytes(), &self.sink);
    }

    /// Run the full supervised session. Terminal attributes are restored
    /// on every exit path, including errors.
    pub fn run(&mut self) -> std::result::Result<SessionEnd, SessionError> {
        self.emit(&format!(
            "{}\r\n",
            "Starting supervised session in subscription mode...".green()
        ));

        let handle = self
            .supervisor
            .spawn(&self.config.baseline_env())
            .map_err(SessionError::Other)?;

        if self.config.detection == Detection::Log {
            if let Some(log_dir) = project_log_dir(&self.supervisor.command().cwd) {
                self.log_tail = Some(spawn_log_tail(
                    log_dir,
                    self.config.trigger_set(),
                    self.signal.clone(),
                ));
            }
        }

        if let Err(e) = self.io.term.enter_raw() {
            debug!("raw mode unavailable: {e}");
        }

        let result = self.run_loop(handle);

        if let Some(mut log_tail) = self.log_tail.take() {
            log_tail.stop(LOG_TAIL_STOP_TIMEOUT);
        }
        let _ = self.io.term.restore();

        result
    }

    fn run_loop(
        &mut self,
        mut handle: ChildHandle,
    ) -> std::result::Result<SessionEnd, SessionError> {
        let mut last_size = terminal_size();

        loop {
            if self.io.interrupt.load(Ordering::SeqCst) {
                self.emit(&format!("\r\n{}\r\n", "Interrupted by user".yellow()));
                handle.teardown();
                return Ok(SessionEnd::Interrupted);
            }

            if let ChildStatus::Exited(code) = handle.poll() {
                // Drains the watcher so trailing output reaches the user.
                handle.teardown();
                self.emit(&format!("\r\n{}\r\n", "Supervised session ended".dimmed()));
                return Ok(SessionEnd::ChildExited(code));
            }

            if self.signal.take() {
                match self.handle_switch(handle)? {
                    SwitchOutcome::Continued(new_handle) => handle = new_handle,
                    SwitchOutcome::Declined => return Ok(SessionEnd::SwitchDeclined),
                }
            }

            loop {
                match self.io.input.try_recv() {
                    Ok(bytes) => {
                        if handle.channel.write(&bytes).is_err() {
                            // Child gone; the next poll reports the exit.
                            break;
                        }
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            let size = terminal_size();
            if size_changed(last_size, size) {
                let _ = handle.channel.resize(size.rows, size.cols);
                last_size = size;
            }

            std::thread::sleep(TICK);
        }
    }

    /// A trigger fired: orchestrate the subscription → API switch.
    fn handle_switch(
        &mut self,
        old: ChildHandle,
    ) -> std::result::Result<SwitchOutcome, SessionError> {
        if self.mode == Mode::Api {
            // Already elevated; nothing further to switch to.
            self.signal.acknowledge();
            return Ok(SwitchOutcome::Continued(old));
        }

        let _ = self.io.term.restore();
        self.emit(&format!(
            "\r\n{}\r\n",
            "⚠ Usage limit reached!".yellow().bold()
        ));
        self.io
            .notifier
            .notify("tether", "Usage limit reached — switching to API billing");

        let proceed = if self.config.auto_switch {
            true
        } else if self.config.prompt_before_switch {
            self.emit("Continue with API billing? (y/n): ");
            self.io.prompter.confirm(&self.io.input)
        } else {
            true
        };

        if !proceed {
            self.emit(&format!(
                "{}\r\n",
                "Switch cancelled. Stopping session...".red()
            ));
            let mut old = old;
            old.teardown();
            self.signal.acknowledge();
            return Ok(SwitchOutcome::Declined);
        }

        self.emit(&format!("{}\r\n", "Switching to API mode...".yellow().bold()));
        match self
            .supervisor
            .restart(old, &self.config.elevated_env())
        {
            Ok(new_handle) => {
                self.mode = Mode::Api;
                if let Err(e) = self.io.term.enter_raw() {
                    debug!("raw mode unavailable after switch: {e}");
                }
                self.signal.acknowledge();
                self.emit(&format!("{}\r\n", "✓ Switched to API mode".green().bold()));
                Ok(SwitchOutcome::Continued(new_handle))
            }
            Err(e) => {
                self.signal.acknowledge();
                Err(SessionError::RestartFailed(e))
            }
        }
    }
}

/// Resize helper shared by callers that track geometry as `PtySize`.
pub fn size_changed(previous: PtySize, current: PtySize) -> bool {
    previous.rows != current.rows || previous.cols != current.cols
}
