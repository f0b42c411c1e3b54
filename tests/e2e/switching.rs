//! Full-session switching scenarios: limit detected, user confirms or
//! declines, environment and terminal state handled across the restart.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use tether::pty::SupervisedCommand;
use tether::session::{LinePrompter, Mode, Session, SessionEnd, SessionError, SessionIo};

use crate::helpers::{
    assert_term_balanced, memory_sink, scripted_io, sink_text, test_config, wait_for_condition,
    CountingNotifier, RecordingTerm,
};

const TEST_KEY: &str = "sk-ant-e2e-test-key";

/// A child that reports the limit in subscription mode and records its
/// credential when respawned with one.
fn mode_probe_command(marker: &Path) -> SupervisedCommand {
    let script = format!(
        "if [ -n \"$ANTHROPIC_API_KEY\" ]; then \
             printf '%s' \"$ANTHROPIC_API_KEY\" > {marker}; sleep 30; \
         else \
             echo 'Usage limit reached'; sleep 30; \
         fi",
        marker = marker.display()
    );
    SupervisedCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script],
        cwd: std::env::temp_dir(),
    }
}

#[test]
fn test_confirmed_switch_respawns_with_credential() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("credential-marker");

    let (sink, out) = memory_sink();
    let (io, probes) = scripted_io(&[true]);
    let mut session = Session::new(
        test_config(TEST_KEY),
        mode_probe_command(&marker),
        sink,
        io,
    );

    let worker = thread::spawn(move || {
        let end = session.run();
        (session.mode(), end)
    });

    wait_for_condition(
        || std::fs::read_to_string(&marker).ok().as_deref() == Some(TEST_KEY),
        15_000,
    )
    .expect("respawned child should see the API credential");

    probes.interrupt.store(true, Ordering::SeqCst);
    let (mode, end) = worker.join().expect("session thread");

    assert_eq!(mode, Mode::Api);
    assert_eq!(
        end.expect("session should end cleanly"),
        SessionEnd::Interrupted
    );
    assert_eq!(probes.asked.load(Ordering::SeqCst), 1);
    assert_eq!(probes.notified.load(Ordering::SeqCst), 1);
    // Status lines travel through the same sink as relayed output.
    assert!(sink_text(&out).contains("Switched to API mode"));
    assert_term_balanced(&probes.term_log);
}

/// The confirmation answer must arrive over the session's input channel;
/// a second reader on the terminal device would race the stdin thread
/// for the user's keystrokes.
#[test]
fn test_prompt_answer_travels_over_the_input_channel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("credential-marker");

    let (sink, out) = memory_sink();
    let (input_tx, input_rx) = mpsc::channel();
    let (term, term_log) = RecordingTerm::new();
    let (notifier, notified) = CountingNotifier::new();
    let interrupt = Arc::new(AtomicBool::new(false));
    let io = SessionIo {
        input: input_rx,
        term: Box::new(term),
        prompter: Box::new(LinePrompter),
        notifier: Box::new(notifier),
        interrupt: interrupt.clone(),
    };
    let mut session = Session::new(
        test_config(TEST_KEY),
        mode_probe_command(&marker),
        sink,
        io,
    );

    let worker = thread::spawn(move || {
        let end = session.run();
        (session.mode(), end)
    });

    // Answer only once the prompt is up; earlier bytes would be forwarded
    // to the child as ordinary input.
    wait_for_condition(|| notified.load(Ordering::SeqCst) == 1, 15_000)
        .expect("limit should be detected");
    input_tx.send(b"y\n".to_vec()).expect("send answer");

    wait_for_condition(
        || std::fs::read_to_string(&marker).ok().as_deref() == Some(TEST_KEY),
        15_000,
    )
    .expect("typed confirmation should drive the switch");

    interrupt.store(true, Ordering::SeqCst);
    let (mode, end) = worker.join().expect("session thread");

    assert_eq!(mode, Mode::Api);
    assert_eq!(
        end.expect("session should end cleanly"),
        SessionEnd::Interrupted
    );
    assert!(sink_text(&out).contains("Continue with API billing?"));
    assert_term_balanced(&term_log);
}

#[test]
fn test_declined_switch_stops_without_respawn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spawns = dir.path().join("spawn-log");
    let script = format!(
        "echo spawned >> {spawns}; echo 'Usage limit reached'; sleep 30",
        spawns = spawns.display()
    );
    let command = SupervisedCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script],
        cwd: std::env::temp_dir(),
    };

    let (sink, out) = memory_sink();
    let (io, probes) = scripted_io(&[false]);
    let mut session = Session::new(test_config(TEST_KEY), command, sink, io);

    let end = session.run().expect("decline is a clean end, not an error");

    assert_eq!(end, SessionEnd::SwitchDeclined);
    assert!(sink_text(&out).contains("Switch cancelled"));
    assert_eq!(session.mode(), Mode::Subscription);
    assert_eq!(probes.asked.load(Ordering::SeqCst), 1);
    assert_eq!(probes.notified.load(Ordering::SeqCst), 1);
    let spawn_count = std::fs::read_to_string(&spawns)
        .expect("first child should have recorded its spawn")
        .lines()
        .count();
    assert_eq!(spawn_count, 1, "a declined switch must not respawn");
    assert_term_balanced(&probes.term_log);
}

#[test]
fn test_auto_switch_never_prompts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("credential-marker");

    let mut config = test_config(TEST_KEY);
    config.auto_switch = true;

    let (sink, _out) = memory_sink();
    let (io, probes) = scripted_io(&[]);
    let mut session = Session::new(config, mode_probe_command(&marker), sink, io);

    let worker = thread::spawn(move || {
        let end = session.run();
        (session.mode(), end)
    });

    wait_for_condition(
        || std::fs::read_to_string(&marker).ok().as_deref() == Some(TEST_KEY),
        15_000,
    )
    .expect("auto switch should respawn with the API credential");

    probes.interrupt.store(true, Ordering::SeqCst);
    let (mode, end) = worker.join().expect("session thread");

    assert_eq!(mode, Mode::Api);
    assert_eq!(
        end.expect("session should end cleanly"),
        SessionEnd::Interrupted
    );
    assert_eq!(
        probes.asked.load(Ordering::SeqCst),
        0,
        "auto_switch must bypass the prompt"
    );
    assert_term_balanced(&probes.term_log);
}

#[test]
fn test_failed_respawn_surfaces_error_and_restores_terminal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("vanishing-child");
    let started = dir.path().join("started");
    let go = dir.path().join("go");
    let script = format!(
        "#!/bin/sh\ntouch {started}\nwhile [ ! -e {go} ]; do sleep 0.05; done\n\
         echo 'Usage limit reached'\nsleep 30\n",
        started = started.display(),
        go = go.display()
    );
    std::fs::write(&script_path, script).expect("write script");
    std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
        .expect("mark script executable");

    let mut config = test_config(TEST_KEY);
    config.auto_switch = true;

    let command = SupervisedCommand {
        program: script_path.to_string_lossy().into_owned(),
        args: Vec::new(),
        cwd: dir.path().to_path_buf(),
    };

    let (sink, _out) = memory_sink();
    let (io, probes) = scripted_io(&[]);
    let mut session = Session::new(config, command, sink, io);

    let worker = thread::spawn(move || {
        let end = session.run();
        (session.mode(), end)
    });

    wait_for_condition(|| started.exists(), 10_000).expect("first child should start");
    // The program disappears between the first spawn and the respawn.
    std::fs::remove_file(&script_path).expect("remove script");
    std::fs::write(&go, b"").expect("release the child");

    let (mode, end) = worker.join().expect("session thread");

    assert_eq!(mode, Mode::Subscription, "a failed switch must not claim API mode");
    let err = end.expect_err("respawn failure must surface as an error");
    assert!(
        matches!(err, SessionError::RestartFailed(_)),
        "unexpected error variant: {err}"
    );
    assert_term_balanced(&probes.term_log);
}

#[test]
fn test_session_ends_with_child_exit_code() {
    let command = SupervisedCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), "exit 3".to_string()],
        cwd: std::env::temp_dir(),
    };

    let (sink, _out) = memory_sink();
    let (io, probes) = scripted_io(&[]);
    let mut session = Session::new(test_config(TEST_KEY), command, sink, io);

    let end = session.run().expect("session should end cleanly");

    assert_eq!(end, SessionEnd::ChildExited(Some(3)));
    assert_eq!(probes.notified.load(Ordering::SeqCst), 0);
    assert_term_balanced(&probes.term_log);
}
