//! `tether run` - the full supervised session.

use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use colored::Colorize;

use crate::config::Config;
use crate::notify::{DesktopNotifier, Notifier, NullNotifier};
use crate::pty::SupervisedCommand;
use crate::session::{CrosstermMode, LinePrompter, Session, SessionEnd, SessionError, SessionIo};
use crate::utils::install_terminal_panic_hook;
use crate::watcher::stdout_sink;

/// Exit code for configuration problems, distinct from child failures.
const CONFIG_EXIT_CODE: i32 = 2;

/// Run the supervised session and return the process exit code.
/// Usage: tether run [--config <path>] [--command <cmd>] [--quiet]
pub fn execute(config_path: Option<PathBuf>, command: Option<String>, quiet: bool) -> i32 {
    match run_session(config_path, command, quiet) {
        Ok(SessionEnd::ChildExited(code)) => code.map(|c| c as i32).unwrap_or(0),
        Ok(SessionEnd::SwitchDeclined) | Ok(SessionEnd::Interrupted) => 0,
        Err(RunError::Config(e)) => {
            eprintln!("{}", format!("Configuration error: {e:#}").red());
            CONFIG_EXIT_CODE
        }
        Err(RunError::Session(e)) => {
            eprintln!("{}", format!("Error: {e:#}").red());
            1
        }
    }
}

enum RunError {
    Config(anyhow::Error),
    Session(anyhow::Error),
}

fn run_session(
    config_path: Option<PathBuf>,
    command: Option<String>,
    quiet: bool,
) -> std::result::Result<SessionEnd, RunError> {
    let (config, path) = Config::load(config_path.as_deref()).map_err(RunError::Config)?;
    config
        .validate()
        .map_err(|e| RunError::Config(e.context(format!("in config file {}", path.display()))))?;

    let cwd = std::env::current_dir()
        .context("Failed to resolve working directory")
        .map_err(RunError::Session)?;
    let command_line = command.unwrap_or_else(|| config.command.clone());
    let supervised = SupervisedCommand::parse(&command_line, cwd).map_err(RunError::Config)?;

    install_terminal_panic_hook();

    let interrupt = Arc::new(AtomicBool::new(false));
    let interrupt_flag = interrupt.clone();
    ctrlc::set_handler(move || {
        interrupt_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")
    .map_err(RunError::Session)?;

    let notifier: Box<dyn Notifier> = if quiet {
        Box::new(NullNotifier)
    } else {
        Box::new(DesktopNotifier)
    };

    let io = SessionIo {
        input: spawn_stdin_reader(),
        term: Box::new(CrosstermMode::default()),
        prompter: Box::new(LinePrompter),
        notifier,
        interrupt,
    };

    let mut session = Session::new(config, supervised, stdout_sink(), io);
    session.run().map_err(|e| match e {
        SessionError::RestartFailed(_) => RunError::Session(anyhow::Error::new(e)),
        SessionError::Other(inner) => RunError::Session(inner),
    })
}

/// Feed raw stdin bytes to the session over a channel. The thread ends
/// on stdin EOF or when the session drops the receiver.
fn spawn_stdin_reader() -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    rx
}
