//! systemg-wrapper runs a single agent executable as a managed OS service. It answers
//! the host's service manager, launches the agent from the wrapper's own directory,
//! relays the agent's diagnostic output into the system log, and stops the agent
//! gracefully on request, escalating to a forced kill when the agent does not exit.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Constants shared across the wrapper.
pub mod constants;

/// Error handling.
pub mod error;

/// OS-specific service host adapters.
pub mod host;

/// Locating the agent executable.
pub mod locator;

/// Diagnostic line classification and forwarding.
pub mod logs;

/// Child process launching and signalling.
pub mod process;

/// Service control loop.
pub mod service;

/// System log destinations.
pub mod sink;

/// Agent supervisor.
pub mod supervisor;

/// Test doubles for the agent process and the system log.
pub mod test_utils;
