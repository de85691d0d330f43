//! Supervisor for the single agent process.
//!
//! Owns the agent from spawn until its exit is observed: wires the diagnostic
//! stream into a [`Forwarder`], runs the wait-task that announces the exit, and
//! escalates a graceful stop to a kill once the stop budget is spent.
use std::{
    io,
    sync::{Arc, OnceLock},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    constants::{FORWARDER_DRAIN_TIMEOUT, STOP_POLL_INTERVAL, STOP_TIMEOUT},
    error::{SpawnError, StopError},
    locator::{Locator, agent_path},
    logs::{Forwarder, LogSink},
    process::{ChildExit, LaunchedProcess, Launcher, ProcessControl},
};

/// Timings used while stopping the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Budget for the agent to exit after the interrupt before it is killed.
    pub timeout: Duration,
    /// Interval between exit checks within the budget.
    pub poll_interval: Duration,
    /// How long the wait-task lets the forwarder finish before announcing the exit.
    pub drain_timeout: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            timeout: STOP_TIMEOUT,
            poll_interval: STOP_POLL_INTERVAL,
            drain_timeout: FORWARDER_DRAIN_TIMEOUT,
        }
    }
}

/// The attached agent. The exit cell is written once by the wait-task.
struct RunningAgent {
    pid: u32,
    control: Box<dyn ProcessControl>,
    exit: Arc<OnceLock<ChildExit>>,
}

/// Launches and stops the agent on behalf of the service control loop.
pub struct Supervisor {
    agent: String,
    locator: Box<dyn Locator>,
    launcher: Box<dyn Launcher>,
    sink: Arc<dyn LogSink>,
    policy: StopPolicy,
    child: Option<RunningAgent>,
}

impl Supervisor {
    /// Creates a supervisor for the agent executable named `agent`.
    pub fn new(
        agent: impl Into<String>,
        locator: Box<dyn Locator>,
        launcher: Box<dyn Launcher>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            agent: agent.into(),
            locator,
            launcher,
            sink,
            policy: StopPolicy::default(),
            child: None,
        }
    }

    /// Overrides the stop timings.
    pub fn with_policy(mut self, policy: StopPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The system log shared with the forwarder.
    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// PID of the attached agent, if one was started.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|agent| agent.pid)
    }

    /// Exit recorded by the wait-task, if the agent is gone.
    pub fn exit_status(&self) -> Option<ChildExit> {
        self.child
            .as_ref()
            .and_then(|agent| agent.exit.get().copied())
    }

    /// Spawns the agent next to the wrapper and starts relaying its stderr.
    ///
    /// `on_exit` fires exactly once, from the wait-task, after the agent exits and
    /// the forwarder had a chance to relay the tail of the stream.
    pub fn start<F>(&mut self, on_exit: F) -> Result<u32, SpawnError>
    where
        F: FnOnce(io::Result<ChildExit>) + Send + 'static,
    {
        if let Some(agent) = &self.child {
            return Err(SpawnError::AlreadyRunning(agent.pid));
        }

        let dir = self
            .locator
            .executable_dir()
            .map_err(SpawnError::Locate)?;
        let path = agent_path(&dir, &self.agent);
        if !self.launcher.is_launchable(&path) {
            return Err(SpawnError::NotFound { path });
        }
        debug!("Launching agent {}", path.display());

        let LaunchedProcess {
            pid,
            diagnostics,
            control,
            waiter,
        } = self
            .launcher
            .launch(&path, &dir)
            .map_err(|source| SpawnError::Launch {
                path: path.clone(),
                source,
            })?;
        info!("Agent '{}' started with PID {pid}", self.agent);

        let forwarder = Forwarder::spawn(diagnostics, self.sink.clone());
        let exit = Arc::new(OnceLock::new());
        let recorded = exit.clone();
        let drain_timeout = self.policy.drain_timeout;

        thread::spawn(move || {
            let result = waiter.wait();
            match &result {
                Ok(status) => {
                    debug!("Agent (PID {pid}) exited with {status}");
                    let _ = recorded.set(*status);
                }
                Err(err) => {
                    warn!("Failed to wait for agent (PID {pid}): {err}");
                    let _ = recorded.set(ChildExit {
                        code: None,
                        signal: None,
                    });
                }
            }
            forwarder.drain(drain_timeout);
            on_exit(result);
        });

        self.child = Some(RunningAgent { pid, control, exit });
        Ok(pid)
    }

    /// Interrupts the agent's process group and waits for it to exit, killing it
    /// once the stop budget runs out.
    ///
    /// A failed interrupt is returned immediately. After a kill the call succeeds;
    /// only a failed kill is reported.
    pub fn request_graceful_stop(&mut self) -> Result<(), StopError> {
        let Some(agent) = self.child.as_ref() else {
            debug!("No agent attached; nothing to stop");
            return Ok(());
        };
        let pid = agent.pid;

        if let Some(exit) = agent.exit.get() {
            debug!("Agent (PID {pid}) already exited with {exit}");
            return Ok(());
        }

        agent
            .control
            .interrupt()
            .map_err(|source| StopError::Signal { pid, source })?;
        debug!("Sent interrupt to process group of agent (PID {pid})");

        let deadline = Instant::now() + self.policy.timeout;
        while Instant::now() < deadline {
            if let Some(exit) = agent.exit.get() {
                info!("Agent (PID {pid}) stopped with {exit}");
                return Ok(());
            }
            thread::sleep(self.policy.poll_interval);
        }

        if let Some(exit) = agent.exit.get() {
            info!("Agent (PID {pid}) stopped with {exit}");
            return Ok(());
        }

        warn!(
            "Agent (PID {pid}) did not exit within {:?} of interrupt; killing",
            self.policy.timeout
        );
        agent
            .control
            .kill()
            .map_err(|source| StopError::Kill { pid, source })
    }
}
