//! Process boundary for the agent: spawning it in its own process group, delivering
//! the graceful interrupt and forcing termination.
//!
//! The supervisor only talks to the traits in this module, which keeps the
//! platform calls in one place and lets tests substitute scripted processes.
use std::{
    ffi::OsString,
    fmt, io,
    io::Read,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
};

use tracing::debug;

/// Exit metadata observed for the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code returned by the process if it terminated normally.
    pub code: Option<i32>,
    /// Signal number if the process was terminated by a signal.
    pub signal: Option<i32>,
}

impl ChildExit {
    /// Exit with the given code.
    pub const fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Termination by the given signal.
    pub const fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit status {code}"),
            (None, Some(signal)) => write!(f, "terminated by signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Signals a running agent.
pub trait ProcessControl: Send {
    /// Sends the graceful interrupt to the agent's process group.
    fn interrupt(&self) -> io::Result<()>;

    /// Forcibly terminates the agent. Killing an agent that is already gone succeeds.
    fn kill(&self) -> io::Result<()>;
}

/// Blocks until the agent exits. Consumed by the wait-task.
pub trait ExitWaiter: Send {
    fn wait(self: Box<Self>) -> io::Result<ChildExit>;
}

/// Everything the supervisor needs from a freshly spawned agent.
pub struct LaunchedProcess {
    pub pid: u32,
    /// The agent's diagnostic stream (stderr).
    pub diagnostics: Box<dyn Read + Send>,
    pub control: Box<dyn ProcessControl>,
    pub waiter: Box<dyn ExitWaiter>,
}

/// Spawns the agent executable.
pub trait Launcher: Send {
    /// Whether `program` is a regular file that can be handed to [`Launcher::launch`].
    fn is_launchable(&self, program: &Path) -> bool {
        program.is_file()
    }

    fn launch(&self, program: &Path, working_dir: &Path) -> io::Result<LaunchedProcess>;
}

/// Launches the agent as a real OS process.
///
/// Stdin is shared with the wrapper, stdout is discarded and stderr is piped to
/// the forwarder. The agent leads a new process group so the interrupt reaches
/// it and its descendants but never the wrapper.
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher {
    args: Vec<OsString>,
}

impl CommandLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra arguments passed through to the agent.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, program: &Path, working_dir: &Path) -> io::Result<LaunchedProcess> {
        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .current_dir(working_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        platform::configure(&mut cmd);

        debug!("Executing command: {cmd:?}");
        let mut child = cmd.spawn()?;
        let pid = child.id();

        let Some(stderr) = child.stderr.take() else {
            abandon(&mut child);
            return Err(io::Error::other("agent stderr was not captured"));
        };

        let control = match platform::GroupSignaller::new(pid) {
            Ok(control) => control,
            Err(err) => {
                abandon(&mut child);
                return Err(err);
            }
        };

        Ok(LaunchedProcess {
            pid,
            diagnostics: Box::new(stderr),
            control: Box::new(control),
            waiter: Box::new(ChildWaiter { child }),
        })
    }
}

/// Kills and reaps a child that could not be fully wired up.
fn abandon(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

struct ChildWaiter {
    child: Child,
}

impl ExitWaiter for ChildWaiter {
    fn wait(mut self: Box<Self>) -> io::Result<ChildExit> {
        self.child.wait().map(ChildExit::from)
    }
}

#[cfg(unix)]
mod platform {
    use std::{io, os::unix::process::CommandExt, process::Command};

    use nix::{
        errno::Errno,
        sys::signal::{self, SigSet, SigmaskHow, Signal},
        unistd::Pid,
    };

    use super::ProcessControl;

    pub(super) fn configure(cmd: &mut Command) {
        cmd.process_group(0);
        unsafe {
            cmd.pre_exec(|| {
                // The wrapper blocks its control signals in every thread; the
                // agent must start with them deliverable again.
                signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)
                    .map_err(io::Error::from)
            });
        }
    }

    /// Signals the agent's process group; the agent is the group leader.
    pub(super) struct GroupSignaller {
        pid: Pid,
    }

    impl GroupSignaller {
        pub(super) fn new(pid: u32) -> io::Result<Self> {
            Ok(Self {
                pid: Pid::from_raw(pid as i32),
            })
        }
    }

    impl ProcessControl for GroupSignaller {
        fn interrupt(&self) -> io::Result<()> {
            signal::killpg(self.pid, Signal::SIGINT).map_err(io::Error::from)
        }

        fn kill(&self) -> io::Result<()> {
            // The group outlives a reaped leader only while members remain, so a
            // recycled PID is never signalled.
            match signal::killpg(self.pid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(err) => Err(err.into()),
            }
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::{io, os::windows::process::CommandExt, process::Command};

    use windows_sys::Win32::{
        Foundation::{CloseHandle, HANDLE},
        System::{
            Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent},
            Threading::{
                CREATE_NEW_PROCESS_GROUP, OpenProcess, PROCESS_TERMINATE, TerminateProcess,
            },
        },
    };

    use super::ProcessControl;

    pub(super) fn configure(cmd: &mut Command) {
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    /// Delivers CTRL_BREAK to the agent's console process group and owns a
    /// termination handle that outlives the wait-task's `Child`.
    pub(super) struct GroupSignaller {
        pid: u32,
        handle: HANDLE,
    }

    // The handle is only used for TerminateProcess and closed on drop.
    unsafe impl Send for GroupSignaller {}

    impl GroupSignaller {
        pub(super) fn new(pid: u32) -> io::Result<Self> {
            let handle = unsafe { OpenProcess(PROCESS_TERMINATE, 0, pid) };
            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { pid, handle })
        }
    }

    impl ProcessControl for GroupSignaller {
        fn interrupt(&self) -> io::Result<()> {
            if unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, self.pid) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn kill(&self) -> io::Result<()> {
            if unsafe { TerminateProcess(self.handle, 1) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    impl Drop for GroupSignaller {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.handle);
            }
        }
    }
}
