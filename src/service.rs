//! Service control loop: the state machine that answers the host's service
//! manager and drives the agent supervisor.
//!
//! Control requests and the agent's exit notification are funnelled into one
//! inbox, so the loop only ever blocks on a single `recv`.
use std::{
    io,
    sync::{
        Arc,
        mpsc::{self, Receiver, SendError, Sender},
    },
};

use strum_macros::Display;
use tracing::{debug, error, info, warn};

use crate::{
    constants::{KILL_FAILURE_EXIT_CODE, START_FAILURE_EXIT_CODE},
    logs::{EventId, EventLevel, LogSink},
    process::ChildExit,
    supervisor::Supervisor,
};

/// State reported to the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ServiceState {
    StartPending,
    Running,
    StopPending,
    Stopped,
}

/// Request delivered by the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ControlRequest {
    /// Report the current status again.
    Interrogate,
    Stop,
    /// The host is shutting down.
    Shutdown,
}

/// Controls the service is currently willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlsAccepted {
    pub stop: bool,
    pub shutdown: bool,
}

impl ControlsAccepted {
    pub const NONE: Self = Self {
        stop: false,
        shutdown: false,
    };

    pub const STOP_AND_SHUTDOWN: Self = Self {
        stop: true,
        shutdown: true,
    };
}

/// Exit code attached to a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExitCode {
    /// Generic OS-level code; `0` means no error.
    Win32(u32),
    /// Code defined by this service.
    ServiceSpecific(u32),
}

impl ServiceExitCode {
    pub const NO_ERROR: Self = Self::Win32(0);
}

/// One status report sent to the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: ServiceState,
    pub controls_accepted: ControlsAccepted,
    pub exit_code: ServiceExitCode,
}

impl Status {
    pub const fn start_pending() -> Self {
        Self {
            state: ServiceState::StartPending,
            controls_accepted: ControlsAccepted::NONE,
            exit_code: ServiceExitCode::NO_ERROR,
        }
    }

    pub const fn running() -> Self {
        Self {
            state: ServiceState::Running,
            controls_accepted: ControlsAccepted::STOP_AND_SHUTDOWN,
            exit_code: ServiceExitCode::NO_ERROR,
        }
    }

    /// Controls stay accepted so the manager can keep interrogating mid-shutdown.
    pub const fn stop_pending() -> Self {
        Self {
            state: ServiceState::StopPending,
            controls_accepted: ControlsAccepted::STOP_AND_SHUTDOWN,
            exit_code: ServiceExitCode::NO_ERROR,
        }
    }

    pub const fn stopped(exit_code: ServiceExitCode) -> Self {
        Self {
            state: ServiceState::Stopped,
            controls_accepted: ControlsAccepted::NONE,
            exit_code,
        }
    }
}

/// How a service run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// The agent is gone, whether it was stopped or exited on its own.
    Stopped,
    /// The agent could not be started; the service never reached `Running`.
    StartFailed,
    /// The agent ignored the interrupt and could not be killed.
    KillFailed,
}

impl ServiceOutcome {
    /// Whether the exit code is service specific rather than generic.
    pub fn is_service_specific(&self) -> bool {
        !matches!(self, Self::Stopped)
    }

    pub fn exit_code(&self) -> u32 {
        match self {
            Self::Stopped => 0,
            Self::StartFailed => START_FAILURE_EXIT_CODE,
            Self::KillFailed => KILL_FAILURE_EXIT_CODE,
        }
    }

    pub fn status_exit_code(&self) -> ServiceExitCode {
        if self.is_service_specific() {
            ServiceExitCode::ServiceSpecific(self.exit_code())
        } else {
            ServiceExitCode::NO_ERROR
        }
    }
}

/// Everything the control loop reacts to.
#[derive(Debug)]
pub enum Event {
    Control(ControlRequest),
    AgentExited(io::Result<ChildExit>),
}

/// Host-side handle for delivering control requests.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: Sender<Event>,
}

impl ControlSender {
    pub fn send(&self, request: ControlRequest) -> Result<(), SendError<ControlRequest>> {
        self.tx
            .send(Event::Control(request))
            .map_err(|_| SendError(request))
    }
}

/// Receiving end of the control loop's inbox.
pub struct Inbox {
    events: Receiver<Event>,
    exit_tx: Sender<Event>,
}

/// Creates the inbox shared by the host (control requests) and the supervisor
/// (exit notification).
pub fn inbox() -> (ControlSender, Inbox) {
    let (tx, events) = mpsc::channel();
    (
        ControlSender { tx: tx.clone() },
        Inbox {
            events,
            exit_tx: tx,
        },
    )
}

/// Sends status reports and remembers the last one for interrogation.
struct StatusReporter<'a> {
    tx: &'a Sender<Status>,
    current: Status,
}

impl<'a> StatusReporter<'a> {
    fn new(tx: &'a Sender<Status>) -> Self {
        Self {
            tx,
            current: Status::start_pending(),
        }
    }

    fn report(&mut self, status: Status) {
        debug!("Reporting service state {}", status.state);
        self.current = status;
        if self.tx.send(status).is_err() {
            debug!("Status receiver gone; report dropped");
        }
    }

    fn echo(&self) {
        if self.tx.send(self.current).is_err() {
            debug!("Status receiver gone; report dropped");
        }
    }
}

/// Reports `Stopped` exactly once when dropped, on every path out of the
/// running loop including unwinding.
struct StoppedReport<'a> {
    tx: &'a Sender<Status>,
    exit_code: ServiceExitCode,
}

impl Drop for StoppedReport<'_> {
    fn drop(&mut self) {
        debug!("Reporting service state {}", ServiceState::Stopped);
        let _ = self.tx.send(Status::stopped(self.exit_code));
    }
}

/// Runs one service lifetime against a supervisor.
pub struct ServiceHandler {
    supervisor: Supervisor,
    sink: Arc<dyn LogSink>,
}

impl ServiceHandler {
    pub fn new(supervisor: Supervisor) -> Self {
        let sink = supervisor.sink().clone();
        Self { supervisor, sink }
    }

    /// Starts the agent, serves control requests until the agent is gone and
    /// returns the outcome for the service manager.
    ///
    /// `StartPending` is reported first. On a start failure nothing else is
    /// reported; otherwise `Stopped` is the last report and is sent exactly once.
    pub fn execute(&mut self, inbox: Inbox, status: &Sender<Status>) -> ServiceOutcome {
        let Inbox { events, exit_tx } = inbox;
        let mut reporter = StatusReporter::new(status);
        reporter.report(Status::start_pending());

        let on_exit = move |result| {
            let _ = exit_tx.send(Event::AgentExited(result));
        };
        if let Err(err) = self.supervisor.start(on_exit) {
            error!("Failed to start agent: {err}");
            self.record(EventId::StartFailure, &err.to_string());
            return ServiceOutcome::StartFailed;
        }

        let mut stopped = StoppedReport {
            tx: status,
            exit_code: ServiceExitCode::NO_ERROR,
        };
        reporter.report(Status::running());

        let outcome = self.serve(&events, &mut reporter);
        stopped.exit_code = outcome.status_exit_code();
        info!("Service finished: {outcome:?}");
        outcome
    }

    fn serve(
        &mut self,
        events: &Receiver<Event>,
        reporter: &mut StatusReporter<'_>,
    ) -> ServiceOutcome {
        let mut stopping = false;

        loop {
            let Ok(event) = events.recv() else {
                warn!("Service inbox closed unexpectedly");
                return ServiceOutcome::Stopped;
            };

            match event {
                Event::Control(ControlRequest::Interrogate) => reporter.echo(),
                Event::Control(request) => {
                    info!("Received {request} request; stopping agent");
                    reporter.report(Status::stop_pending());

                    match self.supervisor.request_graceful_stop() {
                        Ok(()) => stopping = true,
                        Err(err) if err.is_recoverable() => {
                            error!("{err}");
                            self.record(EventId::StopFailure, &err.to_string());
                            reporter.report(Status::running());
                        }
                        Err(err) => {
                            error!("{err}");
                            self.record(EventId::StopFailure, &err.to_string());
                            return ServiceOutcome::KillFailed;
                        }
                    }
                }
                Event::AgentExited(result) => {
                    match result {
                        Ok(exit) if exit.success() || stopping => {
                            info!("Agent exited with {exit}");
                        }
                        Ok(exit) => {
                            warn!("Agent exited unexpectedly with {exit}");
                            self.record(EventId::StopFailure, &format!("agent exited with {exit}"));
                        }
                        Err(err) => {
                            error!("Failed to wait for agent: {err}");
                            self.record(EventId::StopFailure, &err.to_string());
                        }
                    }
                    return ServiceOutcome::Stopped;
                }
            }
        }
    }

    fn record(&self, event: EventId, message: &str) {
        if let Err(err) = self.sink.append(event, EventLevel::Error, message) {
            warn!("Failed to write to system log: {err}");
        }
    }
}
