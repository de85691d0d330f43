#![cfg(unix)]

#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    sync::{Arc, mpsc},
    time::Duration,
};

use common::{
    is_process_alive, read_pid, real_supervisor, wait_for_process_exit, write_script,
};
use systemg_wrapper::{
    error::SpawnError,
    locator::FixedDir,
    logs::{EventId, EventLevel},
    process::{ChildExit, CommandLauncher},
    supervisor::Supervisor,
    test_utils::MemorySink,
};
use tempfile::tempdir;

const EXIT_WAIT: Duration = Duration::from_secs(10);

#[test]
fn graceful_stop_lets_agent_clean_up() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    let pid_file = dir.join("agent.pid");
    write_script(
        dir,
        "agent",
        &format!(
            r#"trap 'echo "2024/01/01 10:00:00 INFO shutting down" >&2; exit 0' INT
echo $$ > {}
while true; do sleep 0.1; done"#,
            pid_file.display()
        ),
    );

    let sink = Arc::new(MemorySink::new());
    let mut supervisor = real_supervisor(dir, "agent", sink.clone());
    let (tx, rx) = mpsc::channel();
    let pid = supervisor
        .start(move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    assert_eq!(read_pid(&pid_file), pid);

    supervisor.request_graceful_stop().unwrap();

    let exit = rx.recv_timeout(EXIT_WAIT).unwrap().unwrap();
    assert!(exit.success(), "agent should exit cleanly, got {exit}");
    assert_eq!(supervisor.exit_status(), Some(exit));

    let entries = sink.entries();
    assert_eq!(entries.len(), 1, "unexpected entries: {entries:?}");
    assert_eq!(entries[0].event, EventId::Default);
    assert_eq!(entries[0].level, EventLevel::Info);
    assert!(entries[0].message.ends_with("INFO shutting down"));
}

#[test]
fn agent_ignoring_interrupt_is_killed() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    let pid_file = dir.join("agent.pid");
    write_script(
        dir,
        "stubborn",
        &format!(
            "trap '' INT\necho $$ > {}\nwhile true; do sleep 0.1; done",
            pid_file.display()
        ),
    );

    let sink = Arc::new(MemorySink::new());
    let mut supervisor = real_supervisor(dir, "stubborn", sink.clone());
    let (tx, rx) = mpsc::channel();
    supervisor
        .start(move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    let pid = read_pid(&pid_file);
    assert!(is_process_alive(pid));

    supervisor.request_graceful_stop().unwrap();

    let exit = rx.recv_timeout(EXIT_WAIT).unwrap().unwrap();
    assert_eq!(exit, ChildExit::signaled(9));
    wait_for_process_exit(pid);
    assert!(sink.entries_for(EventId::StopFailure).is_empty());
}

#[test]
fn exit_is_announced_after_last_line_is_relayed() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    write_script(
        dir,
        "agent",
        "echo 'plain progress line' >&2\necho '2024/01/01 10:00:00 ERROR disk full' >&2\nexit 1",
    );

    let sink = Arc::new(MemorySink::new());
    let mut supervisor = real_supervisor(dir, "agent", sink.clone());
    let (tx, rx) = mpsc::channel();
    let observed = sink.clone();
    supervisor
        .start(move |result| {
            let _ = tx.send((result, observed.entries()));
        })
        .unwrap();

    let (result, entries_at_exit) = rx.recv_timeout(EXIT_WAIT).unwrap();
    assert_eq!(result.unwrap(), ChildExit::exited(1));
    assert_eq!(entries_at_exit.len(), 2);
    assert_eq!(entries_at_exit[0].message, "plain progress line");
    assert_eq!(entries_at_exit[0].level, EventLevel::Error);
    assert_eq!(
        entries_at_exit[1].message,
        "2024/01/01 10:00:00 ERROR disk full"
    );
    assert_eq!(entries_at_exit[1].level, EventLevel::Error);
}

#[test]
fn stop_after_exit_sends_nothing() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    write_script(dir, "agent", "exit 0");

    let mut supervisor = real_supervisor(dir, "agent", Arc::new(MemorySink::new()));
    let (tx, rx) = mpsc::channel();
    supervisor
        .start(move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    rx.recv_timeout(EXIT_WAIT).unwrap().unwrap();

    assert!(supervisor.request_graceful_stop().is_ok());
}

#[test]
fn missing_agent_reports_its_path() {
    let temp = tempdir().unwrap();
    let mut supervisor = real_supervisor(temp.path(), "absent", Arc::new(MemorySink::new()));

    match supervisor.start(|_| {}) {
        Err(SpawnError::NotFound { path }) => {
            assert_eq!(path, temp.path().join("absent"));
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(supervisor.pid().is_none());
}

#[test]
fn directory_at_agent_path_is_not_found() {
    let temp = tempdir().unwrap();
    fs::create_dir(temp.path().join("agent")).unwrap();
    let mut supervisor = real_supervisor(temp.path(), "agent", Arc::new(MemorySink::new()));

    assert!(matches!(
        supervisor.start(|_| {}),
        Err(SpawnError::NotFound { .. })
    ));
    assert!(supervisor.pid().is_none());
}

#[test]
fn missing_interpreter_is_a_launch_error() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempdir().unwrap();
    let path = temp.path().join("agent");
    fs::write(&path, "#!/nonexistent/interpreter\nexit 0\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    let mut supervisor = real_supervisor(temp.path(), "agent", Arc::new(MemorySink::new()));

    match supervisor.start(|_| {}) {
        Err(SpawnError::Launch { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected Launch, got {other:?}"),
    }
    assert!(supervisor.pid().is_none());
}

#[test]
fn agent_runs_in_its_directory_with_arguments() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    write_script(dir, "agent", "pwd > cwd.txt\necho \"$@\" > args.txt");

    let mut supervisor = Supervisor::new(
        "agent",
        Box::new(FixedDir(dir.to_path_buf())),
        Box::new(CommandLauncher::new().with_args(["supervise", "-conf", "agent.conf"])),
        Arc::new(MemorySink::new()),
    );
    let (tx, rx) = mpsc::channel();
    supervisor
        .start(move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    rx.recv_timeout(EXIT_WAIT).unwrap().unwrap();

    let cwd = fs::read_to_string(dir.join("cwd.txt")).unwrap();
    assert_eq!(
        fs::canonicalize(cwd.trim()).unwrap(),
        fs::canonicalize(dir).unwrap()
    );
    assert_eq!(
        fs::read_to_string(dir.join("args.txt")).unwrap().trim(),
        "supervise -conf agent.conf"
    );
}
