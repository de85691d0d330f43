//! Unix host: control requests arrive as signals, status goes to the log and,
//! when running under systemd, to the notification socket.
use std::{
    env,
    os::unix::net::{SocketAddr, UnixDatagram},
    sync::{
        Arc,
        mpsc::{self, Receiver},
    },
    thread::{self, JoinHandle},
};

use nix::sys::signal::{SigSet, Signal};
use tracing::{debug, error, info, warn};

use super::build_supervisor;
use crate::{
    config::{SinkKind, WrapperConfig},
    error::HostError,
    logs::LogSink,
    service::{
        self, ControlRequest, ControlSender, ServiceHandler, ServiceOutcome, ServiceState, Status,
    },
    sink::{SyslogSink, TracingSink},
};

/// Signals the wrapper answers, and the request each one stands for.
const CONTROL_SIGNALS: [(Signal, ControlRequest); 4] = [
    (Signal::SIGTERM, ControlRequest::Stop),
    (Signal::SIGINT, ControlRequest::Stop),
    (Signal::SIGHUP, ControlRequest::Shutdown),
    (Signal::SIGUSR1, ControlRequest::Interrogate),
];

/// Runs one service lifetime, blocking until the agent is gone.
///
/// Must be called before any other thread is started so every thread inherits
/// the blocked control signals.
pub fn run(config: WrapperConfig) -> Result<ServiceOutcome, HostError> {
    let signals = control_signals();
    signals.thread_block()?;

    let sink: Arc<dyn LogSink> = match config.sink {
        SinkKind::System => Arc::new(SyslogSink::open(&config.service_name)?),
        SinkKind::Console => Arc::new(TracingSink),
    };

    let (controls, inbox) = service::inbox();
    spawn_signal_listener(signals, controls)?;

    let (status_tx, status_rx) = mpsc::channel();
    let pump = spawn_status_pump(status_rx, SystemdNotifier::from_env())?;

    info!(
        "Starting service '{}' for agent '{}'",
        config.service_name, config.agent
    );
    let mut handler = ServiceHandler::new(build_supervisor(&config, sink));
    let outcome = handler.execute(inbox, &status_tx);
    drop(status_tx);

    if pump.join().is_err() {
        warn!("Status reporter thread panicked");
    }
    if outcome == ServiceOutcome::StartFailed {
        error!("Service '{}' failed to start", config.service_name);
    }

    Ok(outcome)
}

fn control_signals() -> SigSet {
    let mut set = SigSet::empty();
    for (signal, _) in CONTROL_SIGNALS {
        set.add(signal);
    }
    set
}

fn request_for(signal: Signal) -> Option<ControlRequest> {
    CONTROL_SIGNALS
        .iter()
        .find(|(candidate, _)| *candidate == signal)
        .map(|(_, request)| *request)
}

/// Waits for control signals and forwards them into the service inbox. The
/// thread ends once the inbox is gone.
fn spawn_signal_listener(signals: SigSet, controls: ControlSender) -> std::io::Result<()> {
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            loop {
                let signal = match signals.wait() {
                    Ok(signal) => signal,
                    Err(err) => {
                        error!("Failed waiting for control signals: {err}");
                        return;
                    }
                };

                let Some(request) = request_for(signal) else {
                    continue;
                };
                debug!("Received {signal}; delivering {request} request");
                if controls.send(request).is_err() {
                    return;
                }
            }
        })?;
    Ok(())
}

fn spawn_status_pump(
    statuses: Receiver<Status>,
    notifier: Option<SystemdNotifier>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("status".into()).spawn(move || {
        for status in statuses {
            info!("Service state: {}", status.state);
            if let Some(notifier) = &notifier
                && let Err(err) = notifier.notify(&notify_message(&status))
            {
                warn!("Failed to notify systemd: {err}");
            }
        }
    })
}

/// Notification datagram describing `status`.
fn notify_message(status: &Status) -> String {
    match status.state {
        ServiceState::StartPending => "STATUS=Starting agent".to_string(),
        ServiceState::Running => "READY=1\nSTATUS=Agent running".to_string(),
        ServiceState::StopPending => "STOPPING=1\nSTATUS=Stopping agent".to_string(),
        ServiceState::Stopped => format!("STATUS=Agent stopped ({:?})", status.exit_code),
    }
}

/// Writes `sd_notify` datagrams to the socket named by `NOTIFY_SOCKET`.
struct SystemdNotifier {
    socket: UnixDatagram,
    addr: SocketAddr,
}

impl SystemdNotifier {
    fn from_env() -> Option<Self> {
        let path = env::var("NOTIFY_SOCKET").ok()?;
        match Self::connect(&path) {
            Ok(notifier) => Some(notifier),
            Err(err) => {
                warn!("Ignoring NOTIFY_SOCKET '{path}': {err}");
                None
            }
        }
    }

    fn connect(path: &str) -> std::io::Result<Self> {
        let addr = notify_addr(path)?;
        let socket = UnixDatagram::unbound()?;
        Ok(Self { socket, addr })
    }

    fn notify(&self, message: &str) -> std::io::Result<()> {
        self.socket.send_to_addr(message.as_bytes(), &self.addr)?;
        Ok(())
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn notify_addr(path: &str) -> std::io::Result<SocketAddr> {
    #[cfg(target_os = "android")]
    use std::os::android::net::SocketAddrExt;
    #[cfg(target_os = "linux")]
    use std::os::linux::net::SocketAddrExt;

    match path.strip_prefix('@') {
        Some(name) => SocketAddr::from_abstract_name(name.as_bytes()),
        None => SocketAddr::from_pathname(path),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn notify_addr(path: &str) -> std::io::Result<SocketAddr> {
    if path.starts_with('@') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "abstract sockets are not supported on this platform",
        ));
    }
    SocketAddr::from_pathname(path)
}
