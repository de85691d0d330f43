//! In-memory stand-ins for the system log and the agent process, shared by unit
//! and integration tests.
use std::{
    io::{self, Cursor},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    time::{Duration, Instant},
};

use crate::{
    error::SinkError,
    logs::{EventId, EventLevel, LogSink},
    process::{ChildExit, ExitWaiter, LaunchedProcess, Launcher, ProcessControl},
};

/// Entry captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEntry {
    pub event: EventId,
    pub level: EventLevel,
    pub message: String,
}

/// System log that keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<SinkEntry>>,
    capacity: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects every append once `capacity` entries are stored.
    pub fn failing_after(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity: Some(capacity),
        }
    }

    pub fn entries(&self) -> Vec<SinkEntry> {
        self.lock().clone()
    }

    pub fn entries_for(&self, event: EventId) -> Vec<SinkEntry> {
        self.lock()
            .iter()
            .filter(|entry| entry.event == event)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SinkEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for MemorySink {
    fn append(&self, event: EventId, level: EventLevel, message: &str) -> Result<(), SinkError> {
        let mut entries = self.lock();
        if let Some(capacity) = self.capacity
            && entries.len() >= capacity
        {
            return Err(SinkError::Io(io::Error::other("memory sink full")));
        }
        entries.push(SinkEntry {
            event,
            level,
            message: message.to_string(),
        });
        Ok(())
    }
}

/// Behaviour of a scripted agent.
#[derive(Debug, Clone)]
pub struct MockAgent {
    /// Bytes the agent writes to its diagnostic stream.
    pub output: Vec<u8>,
    /// Exit on its own this long after launch.
    pub exits_after: Option<Duration>,
    /// Exit this long after the first interrupt; `None` ignores interrupts.
    pub exit_on_interrupt: Option<Duration>,
    pub interrupt_fails: bool,
    pub kill_fails: bool,
    /// Status reported on a non-kill exit.
    pub exit: ChildExit,
}

impl Default for MockAgent {
    fn default() -> Self {
        Self {
            output: Vec::new(),
            exits_after: None,
            exit_on_interrupt: Some(Duration::from_millis(10)),
            interrupt_fails: false,
            kill_fails: false,
            exit: ChildExit::exited(0),
        }
    }
}

/// Counters observed across launches of a [`MockLauncher`].
#[derive(Debug, Default)]
pub struct MockStats {
    launches: AtomicUsize,
    interrupts: AtomicUsize,
    kills: AtomicUsize,
}

impl MockStats {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

/// Launcher that runs [`MockAgent`] scripts instead of real processes.
pub struct MockLauncher {
    agent: MockAgent,
    missing: bool,
    launch_error: Option<io::ErrorKind>,
    stats: Arc<MockStats>,
}

impl MockLauncher {
    pub fn new(agent: MockAgent) -> Self {
        Self {
            agent,
            missing: false,
            launch_error: None,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Launcher for which the agent executable does not exist.
    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::new(MockAgent::default())
        }
    }

    /// Launcher whose every launch fails with `kind`.
    pub fn failing(kind: io::ErrorKind) -> Self {
        Self {
            launch_error: Some(kind),
            ..Self::new(MockAgent::default())
        }
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

impl Launcher for MockLauncher {
    fn is_launchable(&self, _program: &Path) -> bool {
        !self.missing
    }

    fn launch(&self, _program: &Path, _working_dir: &Path) -> io::Result<LaunchedProcess> {
        if let Some(kind) = self.launch_error {
            return Err(io::Error::new(kind, "mock launch failure"));
        }
        self.stats.launches.fetch_add(1, Ordering::SeqCst);

        let pid = NEXT_PID.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();

        Ok(LaunchedProcess {
            pid,
            diagnostics: Box::new(Cursor::new(self.agent.output.clone())),
            control: Box::new(MockControl {
                tx,
                stats: self.stats.clone(),
                interrupt_fails: self.agent.interrupt_fails,
                kill_fails: self.agent.kill_fails,
            }),
            waiter: Box::new(MockWaiter {
                rx,
                started: Instant::now(),
                agent: self.agent.clone(),
            }),
        })
    }
}

enum MockSignal {
    Interrupt,
    Kill,
}

struct MockControl {
    tx: mpsc::Sender<MockSignal>,
    stats: Arc<MockStats>,
    interrupt_fails: bool,
    kill_fails: bool,
}

impl ProcessControl for MockControl {
    fn interrupt(&self) -> io::Result<()> {
        self.stats.interrupts.fetch_add(1, Ordering::SeqCst);
        if self.interrupt_fails {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "interrupt refused",
            ));
        }
        let _ = self.tx.send(MockSignal::Interrupt);
        Ok(())
    }

    fn kill(&self) -> io::Result<()> {
        self.stats.kills.fetch_add(1, Ordering::SeqCst);
        if self.kill_fails {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "kill refused",
            ));
        }
        let _ = self.tx.send(MockSignal::Kill);
        Ok(())
    }
}

struct MockWaiter {
    rx: mpsc::Receiver<MockSignal>,
    started: Instant,
    agent: MockAgent,
}

impl ExitWaiter for MockWaiter {
    fn wait(self: Box<Self>) -> io::Result<ChildExit> {
        let mut deadline = self.agent.exits_after.map(|delay| self.started + delay);

        loop {
            let signal = match deadline {
                Some(at) => {
                    match self
                        .rx
                        .recv_timeout(at.saturating_duration_since(Instant::now()))
                    {
                        Ok(signal) => signal,
                        Err(RecvTimeoutError::Timeout) => return Ok(self.agent.exit),
                        Err(RecvTimeoutError::Disconnected) => {
                            std::thread::sleep(at.saturating_duration_since(Instant::now()));
                            return Ok(self.agent.exit);
                        }
                    }
                }
                None => match self.rx.recv() {
                    Ok(signal) => signal,
                    Err(_) => return Ok(ChildExit::signaled(9)),
                },
            };

            match signal {
                MockSignal::Interrupt => {
                    if let Some(delay) = self.agent.exit_on_interrupt {
                        let at = Instant::now() + delay;
                        deadline = Some(deadline.map_or(at, |current| current.min(at)));
                    }
                }
                MockSignal::Kill => return Ok(ChildExit::signaled(9)),
            }
        }
    }
}
