//! Restart semantics: the old child is fully gone before the new one
//! exists, and a failed respawn surfaces as an error rather than a hang.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use tether::process::{is_process_alive, ChildStatus, Supervisor};
use tether::pty::SupervisedCommand;
use tether::trigger::TriggerSignal;

use crate::helpers::memory_sink;

fn current_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[test]
fn test_restart_replaces_the_child() {
    let (sink, _buf) = memory_sink();
    let signal = Arc::new(TriggerSignal::new());
    let supervisor = Supervisor::new(
        SupervisedCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            cwd: std::env::temp_dir(),
        },
        sink,
        signal,
        None,
    );

    let env = current_env();
    let mut handle = supervisor.spawn(&env).expect("first spawn");
    let old_pid = handle.pid().expect("child should have a pid");
    assert_eq!(handle.poll(), ChildStatus::Running);

    let mut replacement = supervisor.restart(handle, &env).expect("restart");

    // restart reaps the old process before returning.
    assert!(
        !is_process_alive(old_pid),
        "old child {old_pid} survived the restart"
    );
    assert_eq!(replacement.poll(), ChildStatus::Running);
    assert_ne!(replacement.pid(), Some(old_pid));

    replacement.teardown();
}

#[test]
fn test_restart_fails_cleanly_when_program_vanishes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("transient-child");
    std::fs::write(&script, "#!/bin/sh\nsleep 30\n").expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
        .expect("mark script executable");

    let (sink, _buf) = memory_sink();
    let signal = Arc::new(TriggerSignal::new());
    let supervisor = Supervisor::new(
        SupervisedCommand {
            program: script.to_string_lossy().into_owned(),
            args: Vec::new(),
            cwd: dir.path().to_path_buf(),
        },
        sink,
        signal,
        None,
    );

    let env = current_env();
    let handle = supervisor.spawn(&env).expect("first spawn");
    std::fs::remove_file(&script).expect("remove script");

    // `.err()` rather than `.expect_err()`: the success value is a live
    // handle and deliberately carries no `Debug` impl.
    let err = supervisor
        .restart(handle, &env)
        .err()
        .expect("respawn of a missing program must fail");
    assert!(
        format!("{err:#}").contains("Failed to respawn"),
        "unexpected error chain: {err:#}"
    );
}
