//! System log destinations.
use tracing::{error, info, warn};

use crate::{
    error::SinkError,
    logs::{EventId, EventLevel, LogSink},
};

/// Writes entries through the wrapper's own `tracing` output.
///
/// Used when running attached to a terminal, where the host log is not wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn append(&self, event: EventId, level: EventLevel, message: &str) -> Result<(), SinkError> {
        let event_id = event.code();
        match level {
            EventLevel::Info => info!(target: "agent", event_id, "{message}"),
            EventLevel::Warning => warn!(target: "agent", event_id, "{message}"),
            EventLevel::Error => error!(target: "agent", event_id, "{message}"),
        }
        Ok(())
    }
}

#[cfg(unix)]
pub use self::syslog::SyslogSink;

#[cfg(unix)]
mod syslog {
    use std::ffi::CString;

    use crate::{
        error::SinkError,
        logs::{EventId, EventLevel, LogSink},
    };

    /// Writes entries to the host's syslog under the daemon facility.
    ///
    /// Syslog has no event identifiers, so only the level is carried over.
    /// `openlog` state is process wide; keep a single instance alive.
    pub struct SyslogSink {
        // openlog keeps the pointer, so the ident must outlive the sink.
        _ident: CString,
    }

    impl SyslogSink {
        pub fn open(ident: &str) -> Result<Self, SinkError> {
            let ident =
                CString::new(ident).map_err(|err| SinkError::Encoding(err.to_string()))?;
            unsafe {
                libc::openlog(
                    ident.as_ptr(),
                    libc::LOG_PID | libc::LOG_NDELAY,
                    libc::LOG_DAEMON,
                );
            }
            Ok(Self { _ident: ident })
        }
    }

    impl LogSink for SyslogSink {
        fn append(
            &self,
            _event: EventId,
            level: EventLevel,
            message: &str,
        ) -> Result<(), SinkError> {
            let priority = match level {
                EventLevel::Info => libc::LOG_INFO,
                EventLevel::Warning => libc::LOG_WARNING,
                EventLevel::Error => libc::LOG_ERR,
            };
            let message = CString::new(message.replace('\0', "\u{FFFD}"))
                .map_err(|err| SinkError::Encoding(err.to_string()))?;
            unsafe {
                libc::syslog(priority, c"%s".as_ptr(), message.as_ptr());
            }
            Ok(())
        }
    }

    impl Drop for SyslogSink {
        fn drop(&mut self) {
            unsafe { libc::closelog() };
        }
    }
}
