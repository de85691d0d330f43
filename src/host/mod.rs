//! Bridges the service control loop to the host's service manager.
//!
//! Unix hosts deliver control requests as signals and learn about status through
//! the wrapper's log and the systemd notification socket. Windows hosts talk to
//! the Service Control Manager.
use std::sync::Arc;

use crate::{
    config::WrapperConfig,
    error::HostError,
    locator::{CurrentExeDir, FixedDir, Locator},
    logs::LogSink,
    process::CommandLauncher,
    service::ServiceOutcome,
    supervisor::Supervisor,
};

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use self::unix::run;

#[cfg(windows)]
pub use self::windows::{EventLogSink, run};

/// Assembles the supervisor described by `config`, writing to `sink`.
pub fn build_supervisor(config: &WrapperConfig, sink: Arc<dyn LogSink>) -> Supervisor {
    let locator: Box<dyn Locator> = match &config.agent_dir {
        Some(dir) => Box::new(FixedDir(dir.clone())),
        None => Box::new(CurrentExeDir),
    };
    let launcher = CommandLauncher::new().with_args(config.agent_args.iter());

    Supervisor::new(config.agent.clone(), locator, Box::new(launcher), sink)
        .with_policy(config.stop_policy)
}

/// Process exit code for a finished service run.
pub fn exit_code(result: &Result<ServiceOutcome, HostError>) -> u8 {
    match result {
        Ok(outcome) => u8::try_from(outcome.exit_code()).unwrap_or(u8::MAX),
        Err(_) => 1,
    }
}
