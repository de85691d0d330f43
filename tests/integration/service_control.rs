#![cfg(unix)]

#[path = "common/mod.rs"]
mod common;

use std::{
    path::Path,
    sync::{Arc, mpsc},
    thread,
};

use common::{read_pid, real_supervisor, wait_for_process_exit, write_script};
use systemg_wrapper::{
    logs::{EventId, EventLevel},
    service::{
        self, ControlRequest, ControlsAccepted, ServiceExitCode, ServiceHandler, ServiceOutcome,
        ServiceState, Status,
    },
    test_utils::MemorySink,
};
use tempfile::tempdir;

struct Run {
    outcome: ServiceOutcome,
    statuses: Vec<Status>,
}

/// Runs the service loop against the real agent `agent` in `dir`, sending
/// `requests` once `ready` exists.
fn run_service(
    dir: &Path,
    agent: &str,
    sink: Arc<MemorySink>,
    ready: Option<&Path>,
    requests: &[ControlRequest],
) -> Run {
    let supervisor = real_supervisor(dir, agent, sink);
    let (controls, inbox) = service::inbox();
    let (status_tx, status_rx) = mpsc::channel();

    let ready = ready.map(Path::to_path_buf);
    let requests = requests.to_vec();
    let driver = thread::spawn(move || {
        if let Some(path) = ready {
            read_pid(&path);
        }
        for request in requests {
            controls.send(request).unwrap();
        }
    });

    let outcome = ServiceHandler::new(supervisor).execute(inbox, &status_tx);
    driver.join().unwrap();

    Run {
        outcome,
        statuses: status_rx.try_iter().collect(),
    }
}

fn states(statuses: &[Status]) -> Vec<ServiceState> {
    statuses.iter().map(|status| status.state).collect()
}

#[test]
fn stop_request_walks_full_lifecycle() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    let pid_file = dir.join("agent.pid");
    write_script(
        dir,
        "agent",
        &format!(
            "trap 'exit 0' INT\necho $$ > {}\nwhile true; do sleep 0.1; done",
            pid_file.display()
        ),
    );

    let sink = Arc::new(MemorySink::new());
    let run = run_service(
        dir,
        "agent",
        sink.clone(),
        Some(&pid_file),
        &[ControlRequest::Interrogate, ControlRequest::Stop],
    );

    assert_eq!(run.outcome, ServiceOutcome::Stopped);
    assert_eq!(
        states(&run.statuses),
        vec![
            ServiceState::StartPending,
            ServiceState::Running,
            ServiceState::Running,
            ServiceState::StopPending,
            ServiceState::Stopped,
        ]
    );
    assert_eq!(
        run.statuses[3].controls_accepted,
        ControlsAccepted::STOP_AND_SHUTDOWN
    );
    assert_eq!(
        run.statuses.last().unwrap().exit_code,
        ServiceExitCode::NO_ERROR
    );
    assert!(sink.entries().is_empty());
}

#[test]
fn disk_full_agent_is_relayed_and_stops_once() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    write_script(
        dir,
        "agent",
        "echo '2024/01/01 10:00:00 ERROR disk full' >&2\nexit 1",
    );

    let sink = Arc::new(MemorySink::new());
    let run = run_service(dir, "agent", sink.clone(), None, &[]);

    assert_eq!(run.outcome, ServiceOutcome::Stopped);
    assert_eq!(
        states(&run.statuses),
        vec![
            ServiceState::StartPending,
            ServiceState::Running,
            ServiceState::Stopped,
        ]
    );

    let relayed = sink.entries_for(EventId::Default);
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].level, EventLevel::Error);
    assert_eq!(relayed[0].message, "2024/01/01 10:00:00 ERROR disk full");

    let failures = sink.entries_for(EventId::StopFailure);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("exit status 1"));
}

#[test]
fn shutdown_kills_agent_that_ignores_interrupt() {
    let temp = tempdir().unwrap();
    let dir = temp.path();
    let pid_file = dir.join("agent.pid");
    write_script(
        dir,
        "agent",
        &format!(
            "trap '' INT\necho $$ > {}\nwhile true; do sleep 0.1; done",
            pid_file.display()
        ),
    );

    let sink = Arc::new(MemorySink::new());
    let run = run_service(
        dir,
        "agent",
        sink.clone(),
        Some(&pid_file),
        &[ControlRequest::Shutdown],
    );

    assert_eq!(run.outcome, ServiceOutcome::Stopped);
    assert_eq!(
        run.statuses
            .iter()
            .filter(|status| status.state == ServiceState::Stopped)
            .count(),
        1
    );
    wait_for_process_exit(read_pid(&pid_file));
    assert!(sink.entries_for(EventId::StopFailure).is_empty());
}

#[test]
fn missing_agent_fails_start_without_running() {
    let temp = tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let run = run_service(temp.path(), "absent", sink.clone(), None, &[]);

    assert_eq!(run.outcome, ServiceOutcome::StartFailed);
    assert_eq!(run.outcome.exit_code(), 1);
    assert_eq!(states(&run.statuses), vec![ServiceState::StartPending]);

    let failures = sink.entries_for(EventId::StartFailure);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("absent"));
}
