//! Output watcher: relays child output and detects trigger phrases.
//!
//! A background thread owns the PTY reader clone. Every chunk is relayed
//! verbatim to the output sink before matching, so relay and detection
//! stay independent and relayed bytes are never reordered. Matches that
//! span chunk boundaries are tolerated false negatives; a partial phrase
//! never raises the signal.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::trigger::{TriggerSet, TriggerSignal};

/// Where relayed bytes go. Production wraps stdout; tests wrap a buffer.
pub type OutputSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Build the production sink over stdout.
pub fn stdout_sink() -> OutputSink {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

/// Handle to a running watcher thread.
pub struct WatcherHandle {
    running: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Has the child's output stream reached EOF (child gone)?
    pub fn output_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Ask the thread to stop without waiting. The thread unblocks once
    /// the child side of the PTY closes.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Cooperative stop with a bounded join. Returns false if the thread
    /// was still blocked when the timeout elapsed (it is then detached).
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        let deadline = Instant::now() + timeout;
        while let Some(thread) = &self.thread {
            if thread.is_finished() {
                let _ = self.thread.take().map(JoinHandle::join);
                return true;
            }
            if Instant::now() >= deadline {
                warn!("Output watcher did not stop within {timeout:?}; detaching");
                self.thread.take();
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

/// Spawn the watcher thread for one child.
///
/// `triggers` is `None` in log-tail mode: output is still relayed, but
/// detection happens elsewhere.
pub fn spawn_watcher(
    mut reader: Box<dyn Read + Send>,
    sink: OutputSink,
    triggers: Option<TriggerSet>,
    signal: Arc<TriggerSignal>,
) -> WatcherHandle {
    let running = Arc::new(AtomicBool::new(true));
    let exited = Arc::new(AtomicBool::new(false));

    let thread_running = running.clone();
    let thread_exited = exited.clone();

    let thread = thread::spawn(move || {
        let mut buf = [0u8; 4096];
        while thread_running.load(Ordering::SeqCst) {
            match reader.read(&mut buf) {
                Ok(0) => {
                    thread_exited.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(n) => {
                    relay_chunk(&buf[..n], &sink);
                    if let Some(set) = &triggers {
                        let text = String::from_utf8_lossy(&buf[..n]);
                        if set.matches_chunk(&text) && signal.raise() {
                            debug!("usage-limit trigger matched in output stream");
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO on the master is how a closed PTY reports child
                    // exit; treat every terminal read error as "exited".
                    debug!("PTY read ended: {e}");
                    thread_exited.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    });

    WatcherHandle {
        running,
        exited,
        thread: Some(thread),
    }
}

/// Relay one chunk verbatim and immediately. Shared with the session
/// controller for its status lines.
pub(crate) fn relay_chunk(chunk: &[u8], sink: &OutputSink) {
    let mut sink = match sink.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if sink.write_all(chunk).and_then(|()| sink.flush()).is_err() {
        warn!("Failed to relay {} bytes to output sink", chunk.len());
    }
}
