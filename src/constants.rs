//! Constants and fixed values for the service wrapper.
//!
//! This module centralizes event identifiers, timings and exit codes used
//! across the supervisor, the control loop and the host adapters.

use std::time::Duration;

// ============================================================================
// Service Identity
// ============================================================================

/// Service name registered with the host when none is given on the command line.
pub const DEFAULT_SERVICE_NAME: &str = "mackerel-agent";

// ============================================================================
// System Log Event Identifiers
// ============================================================================

/// Event id used when relaying the agent's diagnostic lines.
pub const DEFAULT_EVENT_ID: u32 = 1;

/// Event id used when the agent could not be started.
pub const START_EVENT_ID: u32 = 2;

/// Event id used for stop failures and abnormal agent exits.
pub const STOP_EVENT_ID: u32 = 3;

/// Event id used when the forwarder itself fails to read the diagnostic stream.
pub const LOGGER_EVENT_ID: u32 = 4;

// ============================================================================
// Diagnostic Stream
// ============================================================================

/// Longest diagnostic line relayed, in bytes, excluding the line terminator.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

// ============================================================================
// Process Management Timing
// ============================================================================

/// Overall budget for the agent to exit after a graceful interrupt.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between exit checks while waiting out the stop budget.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long the exit path waits for the forwarder to relay the stream tail.
///
/// Descendants of the agent may keep the pipe open after the agent exits, so
/// the wait is bounded.
pub const FORWARDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait hint reported to the host while a state transition is pending.
pub const PENDING_WAIT_HINT: Duration = Duration::from_secs(15);

// ============================================================================
// Exit Codes
// ============================================================================

/// Service-specific exit code reported when the agent could not be started.
pub const START_FAILURE_EXIT_CODE: u32 = 1;

/// Service-specific exit code reported when the agent could not be killed.
pub const KILL_FAILURE_EXIT_CODE: u32 = 2;
