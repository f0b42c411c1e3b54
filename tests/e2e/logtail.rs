//! Log-tail detection through the background thread: events appended
//! after attach fire the signal; logs created after attach are followed
//! from their start.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tether::logtail::spawn_log_tail;
use tether::trigger::{TriggerSet, TriggerSignal};

use crate::helpers::wait_for_condition;

fn append(path: &Path, line: &str) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log for append");
    writeln!(file, "{line}").expect("append log line");
}

#[test]
fn test_appended_limit_event_fires_signal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("session.jsonl");
    append(&log, r#"{"type":"assistant","text":"hello"}"#);

    let signal = Arc::new(TriggerSignal::new());
    let mut handle = spawn_log_tail(
        dir.path().to_path_buf(),
        TriggerSet::usage_limit_defaults(),
        signal.clone(),
    );

    // Give the follower time to attach at the current end of file.
    thread::sleep(Duration::from_millis(300));
    assert!(!signal.take(), "pre-attach events must not fire");

    append(&log, r#"{"type":"system","text":"Usage limit reached"}"#);
    wait_for_condition(|| signal.take(), 5_000).expect("appended event should fire");

    handle.stop(Duration::from_secs(1));
}

#[test]
fn test_log_created_after_attach_is_followed_from_start() {
    let dir = tempfile::tempdir().expect("tempdir");

    let signal = Arc::new(TriggerSignal::new());
    let mut handle = spawn_log_tail(
        dir.path().to_path_buf(),
        TriggerSet::usage_limit_defaults(),
        signal.clone(),
    );

    thread::sleep(Duration::from_millis(300));

    // The session creates its log only once it starts writing; the very
    // first line may already carry the limit event.
    let log = dir.path().join("fresh-session.jsonl");
    append(&log, r#"{"type":"system","text":"rate limit"}"#);
    wait_for_condition(|| signal.take(), 5_000).expect("event in a fresh log should fire");

    handle.stop(Duration::from_secs(1));
}
