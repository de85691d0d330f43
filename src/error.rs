//! Error handling for the service wrapper.
use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while launching the agent.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The directory of the running binary could not be determined.
    #[error("Failed to locate executable directory: {0}")]
    Locate(#[source] io::Error),

    /// The agent executable next to the wrapper is missing or not a regular file.
    #[error("Agent executable not found: {}", path.display())]
    NotFound {
        /// The path that was checked.
        path: PathBuf,
    },

    /// The OS refused to spawn the agent.
    #[error("Failed to start agent '{}': {source}", path.display())]
    Launch {
        /// The executable that failed to start.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// `start` was called while an agent is already attached.
    #[error("Agent is already running with PID {0}")]
    AlreadyRunning(u32),
}

/// Errors raised while stopping the agent.
#[derive(Debug, Error)]
pub enum StopError {
    /// The graceful interrupt could not be delivered. Recoverable.
    #[error("Failed to interrupt agent (PID {pid}): {source}")]
    Signal {
        /// PID of the agent.
        pid: u32,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The agent ignored the interrupt and could not be killed. Fatal.
    #[error("Failed to kill agent (PID {pid}): {source}")]
    Kill {
        /// PID of the agent.
        pid: u32,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },
}

impl StopError {
    /// Whether the supervisor can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StopError::Signal { .. })
    }
}

/// Errors reported by a system log sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The message could not be encoded for the destination.
    #[error("Log message could not be encoded: {0}")]
    Encoding(String),

    /// The destination rejected the write.
    #[error("Failed to write to system log: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while splitting the agent's diagnostic stream into lines.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A line ran past the length cap; the line is dropped and reading goes on.
    #[error("Diagnostic line exceeds {limit} bytes; line dropped")]
    LineTooLong {
        /// The cap that was exceeded.
        limit: usize,
    },

    /// The stream could not be read. Forwarding stops.
    #[error("Reading diagnostic stream failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while validating command-line configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A duration value could not be parsed.
    #[error("Invalid duration value: '{0}'")]
    InvalidDuration(String),

    /// A required value is empty.
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// The polling interval does not fit the stop budget.
    #[error("Poll interval {poll:?} must be non-zero and not exceed stop timeout {timeout:?}")]
    PollInterval {
        /// Configured poll interval.
        poll: std::time::Duration,
        /// Configured stop timeout.
        timeout: std::time::Duration,
    },
}

/// Errors raised by the host adapters that bridge the control loop to the OS.
#[derive(Debug, Error)]
pub enum HostError {
    /// Setting up signal delivery or the status channel failed.
    #[error("Host I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The system log could not be opened.
    #[error("Failed to open system log: {0}")]
    Sink(#[from] SinkError),

    /// A Unix system call failed.
    #[cfg(unix)]
    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    /// The Windows service dispatcher failed.
    #[cfg(windows)]
    #[error("Service control manager error: {0}")]
    Service(#[from] windows_service::Error),
}
