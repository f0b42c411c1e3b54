//! Pseudo-terminal channel for the supervised command.
//!
//! Owns the PTY pair, spawns the child attached to the slave side with an
//! explicit environment, and exposes resize, write, and reader-clone
//! primitives on the master side. Descriptor errors after the child has
//! exited are an expected "exited" condition, not a failure.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};
use tracing::debug;

/// The command line tether supervises, resolved from config or `--command`.
#[derive(Debug, Clone)]
pub struct SupervisedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl SupervisedCommand {
    /// Split a configured command line on whitespace.
    ///
    /// The supervised command is a program name plus simple flags
    /// (`claude --continue`); shell quoting is intentionally not supported.
    pub fn parse(command_line: &str, cwd: PathBuf) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let Some(program) = parts.next() else {
            bail!("Supervised command is empty");
        };
        Ok(Self {
            program,
            args: parts.collect(),
            cwd,
        })
    }
}

/// Current terminal geometry, with a conventional fallback when stdout is
/// not a terminal (tests, pipes).
pub fn terminal_size() -> PtySize {
    let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// One side of a live pseudo-terminal pair, master end.
pub struct PtyChannel {
    master: Option<Box<dyn portable_pty::MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
}

impl PtyChannel {
    /// Open a PTY sized to the current terminal and spawn `command` on the
    /// slave end with exactly the given environment.
    pub fn open(
        command: &SupervisedCommand,
        env: &HashMap<String, String>,
    ) -> Result<(Self, Box<dyn Child + Send + Sync>)> {
        // Fail early with a useful message when the program is missing;
        // the PTY spawn error alone is opaque.
        if which::which(&command.program).is_err() {
            bail!(
                "Supervised command '{}' not found on PATH. \
                 Install it or set `command` in your config.",
                command.program
            );
        }

        let pty_system = native_pty_system();
        let size = terminal_size();
        let pair = pty_system
            .openpty(size)
            .context("Failed to open pseudo-terminal")?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);
        cmd.cwd(&command.cwd);
        cmd.env_clear();
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn '{}'", command.program))?;

        // Drop the slave so reads on the master see EOF when the child exits.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        debug!(
            program = %command.program,
            pid = child.process_id(),
            rows = size.rows,
            cols = size.cols,
            "spawned supervised command"
        );

        Ok((
            Self {
                master: Some(pair.master),
                writer: Some(writer),
            },
            child,
        ))
    }

    /// Propagate terminal geometry. Callable at any time; a no-op after
    /// close.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let Some(master) = &self.master else {
            return Ok(());
        };
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize pseudo-terminal")
    }

    /// A second read handle for the output watcher.
    pub fn clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        let Some(master) = &self.master else {
            bail!("Pseudo-terminal already closed");
        };
        master
            .try_clone_reader()
            .context("Failed to clone PTY reader")
    }

    /// Forward user input to the child. Write errors after the child has
    /// exited are reported as `ChildGone`.
    pub fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), ChildGone> {
        let Some(writer) = &mut self.writer else {
            return Err(ChildGone);
        };
        writer
            .write_all(bytes)
            .and_then(|()| writer.flush())
            .map_err(|_| ChildGone)
    }

    /// Release the master descriptor and writer. Idempotent.
    pub fn close(&mut self) {
        self.writer.take();
        self.master.take();
    }

    pub fn is_closed(&self) -> bool {
        self.master.is_none()
    }
}

/// The other end of the pseudo-terminal is gone; the session treats this
/// as "child exited", never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildGone;
