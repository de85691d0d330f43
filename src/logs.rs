//! Classification and relay of the agent's diagnostic stream into the system log.
use std::{
    io::{self, BufRead, BufReader, Read},
    sync::{Arc, LazyLock, mpsc},
    thread,
    time::Duration,
};

use regex::Regex;
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};

use crate::{
    constants::{
        DEFAULT_EVENT_ID, LOGGER_EVENT_ID, MAX_LINE_BYTES, START_EVENT_ID, STOP_EVENT_ID,
    },
    error::{SinkError, StreamError},
};

/// `YYYY/MM/DD HH:MM:SS <LEVEL> ` anchored at the start of a line.
static LINE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{4}/[0-9]{2}/[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2} ([A-Za-z0-9_]+) ")
        .expect("line prefix pattern is valid")
});

/// Fixed categories of system log entries written by the wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventId {
    /// Relayed diagnostic output of the agent.
    Default,
    /// The agent could not be started.
    StartFailure,
    /// Stopping the agent failed or the agent exited abnormally.
    StopFailure,
    /// The forwarder could not read the diagnostic stream.
    Forwarder,
}

impl EventId {
    /// Numeric identifier recorded with the entry.
    pub const fn code(self) -> u32 {
        match self {
            Self::Default => DEFAULT_EVENT_ID,
            Self::StartFailure => START_EVENT_ID,
            Self::StopFailure => STOP_EVENT_ID,
            Self::Forwarder => LOGGER_EVENT_ID,
        }
    }
}

/// Coarse severity buckets understood by the system log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

/// Level token found in a prefixed diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    /// The prefix matched but the token is not a known level.
    #[strum(disabled)]
    Unknown,
}

impl Severity {
    /// Parses a level token; anything unrecognised becomes [`Severity::Unknown`].
    pub fn from_token(token: &str) -> Self {
        token.parse().unwrap_or(Severity::Unknown)
    }

    /// Maps the agent's level onto the system log's buckets.
    pub const fn event_level(self) -> EventLevel {
        match self {
            Self::Trace | Self::Debug | Self::Info => EventLevel::Info,
            Self::Warning => EventLevel::Warning,
            Self::Error | Self::Critical | Self::Unknown => EventLevel::Error,
        }
    }
}

/// One line of diagnostic output together with the level parsed from its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// The line as written by the agent, without the line terminator.
    pub raw: String,
    /// `None` when the line does not carry the expected prefix.
    pub severity: Option<Severity>,
}

impl LogLine {
    /// Classifies a single line of output.
    pub fn classify(raw: String) -> Self {
        let severity = LINE_PREFIX
            .captures(&raw)
            .and_then(|caps| caps.get(1))
            .map(|token| Severity::from_token(token.as_str()));
        Self { raw, severity }
    }

    /// Level the line is recorded at. Unprefixed output is surfaced as an error,
    /// typically a panic or stack trace spread over several lines.
    pub fn event_level(&self) -> EventLevel {
        self.severity
            .map(Severity::event_level)
            .unwrap_or(EventLevel::Error)
    }
}

/// Append-only, severity-tagged log destination provided by the host.
///
/// Implementations must tolerate concurrent appends from the forwarder and the
/// control loop.
pub trait LogSink: Send + Sync {
    /// Writes one entry.
    fn append(&self, event: EventId, level: EventLevel, message: &str) -> Result<(), SinkError>;
}

/// Lazily splits a byte stream into classified lines until EOF.
///
/// Lines end at `\n`; a trailing `\r` is dropped and invalid UTF-8 is replaced
/// rather than treated as a read failure. A line longer than [`MAX_LINE_BYTES`]
/// is skipped up to its terminator and yields [`StreamError::LineTooLong`].
pub struct DiagnosticLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: Read> DiagnosticLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Discards input up to and including the next `\n`, or to EOF.
    fn skip_line(&mut self) -> io::Result<()> {
        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|byte| *byte == b'\n') {
                Some(at) => {
                    self.reader.consume(at + 1);
                    return Ok(());
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                }
            }
        }
    }
}

impl<R: Read> Iterator for DiagnosticLines<R> {
    type Item = Result<LogLine, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        // Room for a full line plus "\r\n", so the cap excludes the terminator.
        let limit = (MAX_LINE_BYTES + 2) as u64;
        match (&mut self.reader).take(limit).read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                let terminated = self.buf.last() == Some(&b'\n');
                if terminated {
                    self.buf.pop();
                }
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }

                if self.buf.len() > MAX_LINE_BYTES {
                    if !terminated && let Err(err) = self.skip_line() {
                        return Some(Err(err.into()));
                    }
                    return Some(Err(StreamError::LineTooLong {
                        limit: MAX_LINE_BYTES,
                    }));
                }

                let raw = String::from_utf8_lossy(&self.buf).into_owned();
                Some(Ok(LogLine::classify(raw)))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}

/// Relays every line of `reader` to `sink` in order, returning the number of lines seen.
///
/// Stops silently at EOF. Stream errors are written to the sink under
/// [`EventId::Forwarder`]; an over-long line is dropped and forwarding goes on,
/// while a read error ends it.
pub fn forward<R: Read>(reader: R, sink: &dyn LogSink) -> usize {
    let mut forwarded = 0;

    for line in DiagnosticLines::new(reader) {
        match line {
            Ok(line) => {
                forwarded += 1;
                if let Err(err) = sink.append(EventId::Default, line.event_level(), &line.raw)
                {
                    warn!("Failed to relay agent output to system log: {err}");
                }
            }
            Err(err) => {
                warn!("{err}");
                if let Err(sink_err) =
                    sink.append(EventId::Forwarder, EventLevel::Error, &err.to_string())
                {
                    warn!("Failed to record forwarder error in system log: {sink_err}");
                }
                if matches!(err, StreamError::Io(_)) {
                    break;
                }
            }
        }
    }

    forwarded
}

/// Handle to a forwarder running on its own thread.
pub struct Forwarder {
    done: mpsc::Receiver<usize>,
}

impl Forwarder {
    /// Starts relaying `reader` to `sink` on a background thread.
    pub fn spawn<R>(reader: R, sink: Arc<dyn LogSink>) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            let forwarded = forward(reader, sink.as_ref());
            let _ = tx.send(forwarded);
        });
        Self { done }
    }

    /// Waits up to `timeout` for the stream to reach its end.
    ///
    /// Returns `false` when the forwarder is still reading, which happens when a
    /// descendant of the agent keeps the pipe open.
    pub fn drain(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(forwarded) => {
                debug!("Diagnostic stream closed after {forwarded} line(s)");
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("Diagnostic stream still open {timeout:?} after agent exit");
                false
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => false,
        }
    }
}
