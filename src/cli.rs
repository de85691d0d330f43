//! Command-line interface for the service wrapper.
use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::{config::SinkKind, constants::DEFAULT_SERVICE_NAME};

/// Accepted spellings of each wrapper log level, indexed by numeric shorthand.
/// The first spelling is the one handed to `EnvFilter`.
const LEVEL_NAMES: [(LevelFilter, &[&str]); 6] = [
    (LevelFilter::OFF, &["off"]),
    (LevelFilter::ERROR, &["error", "err"]),
    (LevelFilter::WARN, &["warn", "warning"]),
    (LevelFilter::INFO, &["info", "information"]),
    (LevelFilter::DEBUG, &["debug"]),
    (LevelFilter::TRACE, &["trace"]),
];

/// Wrapper log verbosity, given as a level name or its index 0-5.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// Directive for `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        LEVEL_NAMES
            .iter()
            .find(|(level, _)| *level == self.0)
            .map_or("info", |(_, names)| names[0])
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(index) = value.parse::<usize>() {
            return LEVEL_NAMES
                .get(index)
                .map(|(level, _)| LogLevelArg(*level))
                .ok_or_else(|| {
                    format!("log level {index} out of range (0-{})", LEVEL_NAMES.len() - 1)
                });
        }

        let name = value.to_ascii_lowercase();
        LEVEL_NAMES
            .iter()
            .find(|(_, names)| names.contains(&name.as_str()))
            .map(|(level, _)| LogLevelArg(*level))
            .ok_or_else(|| format!("invalid log level '{value}'"))
    }
}

/// Runs an agent executable as a managed OS service.
#[derive(Parser, Debug)]
#[command(name = "sysg-wrapper", version, author)]
#[command(
    about = "Runs an agent as a managed OS service, relaying its stderr to the system log",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity of the wrapper itself.
    #[arg(long, value_name = "LEVEL", env = "SYSG_WRAPPER_LOG_LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Name the service is registered under; also the system log source.
    #[arg(long, default_value = DEFAULT_SERVICE_NAME, env = "SYSG_WRAPPER_SERVICE")]
    pub service_name: String,

    /// Agent executable name without extension (defaults to the service name).
    #[arg(long, env = "SYSG_WRAPPER_AGENT")]
    pub agent: Option<String>,

    /// Directory holding the agent (defaults to the wrapper's own directory).
    #[arg(long, value_name = "DIR", env = "SYSG_WRAPPER_AGENT_DIR")]
    pub agent_dir: Option<PathBuf>,

    /// How long the agent may take to exit after the interrupt before it is killed.
    #[arg(long, value_name = "DURATION", default_value = "10s")]
    pub stop_timeout: String,

    /// How often to check for the agent's exit while stopping.
    #[arg(long, value_name = "DURATION", default_value = "1s")]
    pub poll_interval: String,

    /// Where agent output is recorded: system or console.
    #[arg(long, value_name = "SINK", default_value_t = SinkKind::default())]
    pub sink: SinkKind,

    /// Arguments passed through to the agent.
    #[arg(last = true, value_name = "AGENT_ARGS")]
    pub agent_args: Vec<String>,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
