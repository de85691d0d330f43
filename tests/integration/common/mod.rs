#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use systemg_wrapper::{
    locator::FixedDir, logs::LogSink, process::CommandLauncher, supervisor::StopPolicy,
    supervisor::Supervisor,
};

/// Stop timings short enough for tests.
pub fn fast_policy() -> StopPolicy {
    StopPolicy {
        timeout: Duration::from_millis(800),
        poll_interval: Duration::from_millis(50),
        drain_timeout: Duration::from_secs(2),
    }
}

/// Supervisor for the real agent script `agent` inside `dir`.
pub fn real_supervisor(dir: &Path, agent: &str, sink: Arc<dyn LogSink>) -> Supervisor {
    Supervisor::new(
        agent,
        Box::new(FixedDir(dir.to_path_buf())),
        Box::new(CommandLauncher::new()),
        sink,
    )
    .with_policy(fast_policy())
}

/// Writes an executable shell script named `name` into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    let mut perms = fs::metadata(&path)
        .expect("failed to stat script")
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("failed to chmod script");
    path
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

/// Reads a PID written by an agent script, waiting for the file to be complete.
pub fn read_pid(path: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && let Ok(pid) = content.trim().parse::<u32>()
        {
            return pid;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for a PID in {:?}", path);
        }

        thread::sleep(Duration::from_millis(50));
    }
}

/// Whether `pid` is a live process. Zombies count as gone.
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for PID {} to exit", pid);
}
