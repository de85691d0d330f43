//! Windows host: runs under the Service Control Manager and records agent output
//! in the Application event log.
use std::{
    ffi::OsString,
    io,
    iter, ptr,
    sync::{Arc, Mutex, OnceLock, mpsc},
    thread,
    time::Duration,
};

use tracing::{debug, error, info, warn};
use windows_service::{
    define_windows_service,
    service::{
        ServiceControl, ServiceControlAccept, ServiceExitCode as WinExitCode,
        ServiceState as WinState, ServiceStatus, ServiceType,
    },
    service_control_handler::{self, ServiceControlHandlerResult, ServiceStatusHandle},
    service_dispatcher,
};
use windows_sys::Win32::{
    Foundation::HANDLE,
    System::{
        Console::AllocConsole,
        EventLog::{
            DeregisterEventSource, EVENTLOG_ERROR_TYPE, EVENTLOG_INFORMATION_TYPE,
            EVENTLOG_WARNING_TYPE, RegisterEventSourceW, ReportEventW,
        },
    },
};

use super::build_supervisor;
use crate::{
    config::{SinkKind, WrapperConfig},
    constants::PENDING_WAIT_HINT,
    error::{HostError, SinkError},
    logs::{EventId, EventLevel, LogSink},
    service::{
        self, ControlRequest, ControlSender, ServiceExitCode, ServiceHandler, ServiceOutcome,
        ServiceState, Status,
    },
    sink::TracingSink,
};

const SERVICE_TYPE: ServiceType = ServiceType::OWN_PROCESS;

// The dispatcher entry point takes no context, so the configuration and the
// outcome travel through statics.
static CONFIG: OnceLock<WrapperConfig> = OnceLock::new();
static OUTCOME: Mutex<Option<Result<ServiceOutcome, HostError>>> = Mutex::new(None);

define_windows_service!(ffi_service_main, service_main);

/// Hands the process to the Service Control Manager and blocks until the
/// service has stopped.
pub fn run(config: WrapperConfig) -> Result<ServiceOutcome, HostError> {
    let service_name = config.service_name.clone();
    if CONFIG.set(config).is_err() {
        return Err(io::Error::other("service dispatcher already started").into());
    }

    service_dispatcher::start(&service_name, ffi_service_main)?;

    OUTCOME
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
        .unwrap_or_else(|| Err(io::Error::other("service entry point never ran").into()))
}

fn service_main(_arguments: Vec<OsString>) {
    let result = match CONFIG.get() {
        Some(config) => run_service(config),
        None => Err(io::Error::other("service configuration missing").into()),
    };
    if let Err(err) = &result {
        error!("Service error: {err}");
    }
    *OUTCOME
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result);
}

fn run_service(config: &WrapperConfig) -> Result<ServiceOutcome, HostError> {
    let sink: Arc<dyn LogSink> = match config.sink {
        SinkKind::System => Arc::new(EventLogSink::register(&config.service_name)?),
        SinkKind::Console => Arc::new(TracingSink),
    };

    let (controls, inbox) = service::inbox();
    let handler = move |control: ServiceControl| -> ServiceControlHandlerResult {
        match control {
            ServiceControl::Stop => deliver(&controls, ControlRequest::Stop),
            ServiceControl::Shutdown => deliver(&controls, ControlRequest::Shutdown),
            ServiceControl::Interrogate => deliver(&controls, ControlRequest::Interrogate),
            other => {
                debug!("Unhandled control: {other:?}");
                ServiceControlHandlerResult::NotImplemented
            }
        }
    };
    let status_handle = service_control_handler::register(&config.service_name, handler)?;

    // Services start without a console; the agent needs one to receive CTRL_BREAK.
    if unsafe { AllocConsole() } == 0 {
        debug!(
            "AllocConsole failed: {}; keeping existing console",
            io::Error::last_os_error()
        );
    }

    let (status_tx, status_rx) = mpsc::channel();
    let pump = thread::Builder::new()
        .name("status".into())
        .spawn(move || pump_statuses(status_handle, status_rx))?;

    info!(
        "Starting service '{}' for agent '{}'",
        config.service_name, config.agent
    );
    let mut handler = ServiceHandler::new(build_supervisor(config, sink));
    let outcome = handler.execute(inbox, &status_tx);
    if outcome == ServiceOutcome::StartFailed {
        let _ = status_tx.send(Status::stopped(outcome.status_exit_code()));
    }
    drop(status_tx);

    if pump.join().is_err() {
        warn!("Status reporter thread panicked");
    }
    Ok(outcome)
}

fn deliver(controls: &ControlSender, request: ControlRequest) -> ServiceControlHandlerResult {
    if controls.send(request).is_err() {
        debug!("Service loop gone; dropping {request} request");
    }
    ServiceControlHandlerResult::NoError
}

fn pump_statuses(handle: ServiceStatusHandle, statuses: mpsc::Receiver<Status>) {
    let mut checkpoint = 0;
    for status in statuses {
        let pending = matches!(
            status.state,
            ServiceState::StartPending | ServiceState::StopPending
        );
        checkpoint = if pending { checkpoint + 1 } else { 0 };

        if let Err(err) = handle.set_service_status(service_status(&status, checkpoint)) {
            warn!("Failed to report {} to the SCM: {err}", status.state);
        }
    }
}

/// SCM representation of `status`.
fn service_status(status: &Status, checkpoint: u32) -> ServiceStatus {
    let current_state = match status.state {
        ServiceState::StartPending => WinState::StartPending,
        ServiceState::Running => WinState::Running,
        ServiceState::StopPending => WinState::StopPending,
        ServiceState::Stopped => WinState::Stopped,
    };

    let mut controls_accepted = ServiceControlAccept::empty();
    if status.controls_accepted.stop {
        controls_accepted |= ServiceControlAccept::STOP;
    }
    if status.controls_accepted.shutdown {
        controls_accepted |= ServiceControlAccept::SHUTDOWN;
    }

    let exit_code = match status.exit_code {
        ServiceExitCode::Win32(code) => WinExitCode::Win32(code),
        ServiceExitCode::ServiceSpecific(code) => WinExitCode::ServiceSpecific(code),
    };

    let wait_hint = if checkpoint > 0 {
        PENDING_WAIT_HINT
    } else {
        Duration::default()
    };

    ServiceStatus {
        service_type: SERVICE_TYPE,
        current_state,
        controls_accepted,
        exit_code,
        checkpoint,
        wait_hint,
        process_id: None,
    }
}

/// Writes entries to the Application event log under the service's source name.
pub struct EventLogSink {
    handle: HANDLE,
}

// ReportEventW may be called from any thread on a registered source handle.
unsafe impl Send for EventLogSink {}
unsafe impl Sync for EventLogSink {}

impl EventLogSink {
    pub fn register(source: &str) -> Result<Self, SinkError> {
        let source = to_wide(source)?;
        let handle = unsafe { RegisterEventSourceW(ptr::null(), source.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self { handle })
    }
}

impl LogSink for EventLogSink {
    fn append(&self, event: EventId, level: EventLevel, message: &str) -> Result<(), SinkError> {
        let kind = match level {
            EventLevel::Info => EVENTLOG_INFORMATION_TYPE,
            EventLevel::Warning => EVENTLOG_WARNING_TYPE,
            EventLevel::Error => EVENTLOG_ERROR_TYPE,
        };
        let message = to_wide(message)?;
        let strings = [message.as_ptr()];

        let reported = unsafe {
            ReportEventW(
                self.handle,
                kind,
                0,
                event.code(),
                ptr::null_mut(),
                1,
                0,
                strings.as_ptr(),
                ptr::null(),
            )
        };
        if reported == 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl Drop for EventLogSink {
    fn drop(&mut self) {
        unsafe {
            DeregisterEventSource(self.handle);
        }
    }
}

/// NUL-terminated UTF-16 copy of `value`.
fn to_wide(value: &str) -> Result<Vec<u16>, SinkError> {
    if value.contains('\0') {
        return Err(SinkError::Encoding(format!(
            "interior NUL in '{}'",
            value.escape_debug()
        )));
    }
    Ok(value.encode_utf16().chain(iter::once(0)).collect())
}
