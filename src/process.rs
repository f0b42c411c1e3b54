//! Child process lifecycle: spawn, poll, terminate, restart.
//!
//! One `ChildHandle` is live at a time. `restart` tears the old handle
//! fully down (watcher stopped, descriptor closed, process terminated and
//! reaped) before the new one exists, and re-propagates the current
//! terminal geometry to the fresh pseudo-terminal.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::Child;
use tracing::{debug, warn};

use crate::pty::{terminal_size, PtyChannel, SupervisedCommand};
use crate::trigger::{TriggerSet, TriggerSignal};
use crate::watcher::{spawn_watcher, OutputSink, WatcherHandle};
use std::sync::Arc;

/// Grace period between SIGTERM and SIGKILL.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Bounded wait for the watcher thread to drain after the child is gone.
const WATCHER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Non-blocking liveness result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Running,
    Exited(Option<u32>),
}

/// One running instance of the supervised program.
pub struct ChildHandle {
    child: Box<dyn Child + Send + Sync>,
    pub channel: PtyChannel,
    watcher: Option<WatcherHandle>,
    pid: Option<u32>,
    exit_code: Option<Option<u32>>,
}

impl ChildHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check.
    pub fn poll(&mut self) -> ChildStatus {
        if let Some(code) = self.exit_code {
            return ChildStatus::Exited(code);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let code = Some(status.exit_code());
                self.exit_code = Some(code);
                ChildStatus::Exited(code)
            }
            Ok(None) => ChildStatus::Running,
            Err(e) => {
                // A wait error after the process is gone is an exited
                // condition, not a crash.
                debug!("try_wait failed, treating child as exited: {e}");
                self.exit_code = Some(None);
                ChildStatus::Exited(None)
            }
        }
    }

    /// Graceful shutdown: SIGTERM, bounded grace, then SIGKILL. Reaps the
    /// child before returning.
    pub fn terminate(&mut self) {
        if matches!(self.poll(), ChildStatus::Exited(_)) {
            return;
        }

        if let Some(pid) = self.pid {
            send_signal(pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if matches!(self.poll(), ChildStatus::Exited(_)) {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        warn!(pid = self.pid, "Child ignored SIGTERM; killing");
        self.kill();
    }

    /// Forced termination, reaped.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("kill failed (child likely already gone): {e}");
        }
        self.wait();
    }

    /// Blocking reap. Returns the exit code when the platform reports one.
    pub fn wait(&mut self) -> Option<u32> {
        if let Some(code) = self.exit_code {
            return code;
        }
        let code = self.child.wait().ok().map(|status| status.exit_code());
        self.exit_code = Some(code);
        code
    }

    /// Has the watcher seen the output stream end?
    pub fn output_exited(&self) -> bool {
        self.watcher
            .as_ref()
            .is_some_and(WatcherHandle::output_exited)
    }

    /// Full teardown in the order the watcher race requires: stop the
    /// watcher, close the descriptor, terminate the process, then join
    /// the watcher with a bound.
    pub fn teardown(&mut self) {
        if let Some(watcher) = &self.watcher {
            watcher.request_stop();
        }
        self.channel.close();
        self.terminate();
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop(WATCHER_STOP_TIMEOUT);
        }
    }
}

/// Check liveness by pid with the null signal. EPERM still means alive.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn send_signal(pid: u32, signal: Signal) {
    let Ok(pid) = i32::try_from(pid) else { return };
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!("Failed to send {signal} to {pid}: {e}"),
    }
}

/// Spawns and restarts supervised children, wiring a fresh PTY channel
/// and output watcher for each.
pub struct Supervisor {
    command: SupervisedCommand,
    sink: OutputSink,
    signal: Arc<TriggerSignal>,
    /// `None` when detection runs through the log-tail watcher instead.
    stream_triggers: Option<TriggerSet>,
}

impl Supervisor {
    pub fn new(
        command: SupervisedCommand,
        sink: OutputSink,
        signal: Arc<TriggerSignal>,
        stream_triggers: Option<TriggerSet>,
    ) -> Self {
        Self {
            command,
            sink,
            signal,
            stream_triggers,
        }
    }

    pub fn command(&self) -> &SupervisedCommand {
        &self.command
    }

    /// Start the supervised program under the given environment.
    pub fn spawn(&self, env: &HashMap<String, String>) -> Result<ChildHandle> {
        let (channel, child) = PtyChannel::open(&self.command, env)?;
        let reader = channel.clone_reader()?;
        let watcher = spawn_watcher(
            reader,
            self.sink.clone(),
            self.stream_triggers.clone(),
            self.signal.clone(),
        );
        let pid = child.process_id();
        Ok(ChildHandle {
            child,
            channel,
            watcher: Some(watcher),
            pid,
            exit_code: None,
        })
    }

    /// Stop the old instance and bring up a new one under a different
    /// environment. The old handle is consumed; on success exactly one
    /// live handle exists again, already sized to the current terminal.
    pub fn restart(
        &self,
        mut old: ChildHandle,
        env: &HashMap<String, String>,
    ) -> Result<ChildHandle> {
        debug!(pid = old.pid(), "restarting supervised command");
        old.teardown();

        let handle = self
            .spawn(env)
            .context("Failed to respawn supervised command during mode switch")?;

        let size = terminal_size();
        handle.channel.resize(size.rows, size.cols)?;
        Ok(handle)
    }
}
