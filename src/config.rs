//! Runtime configuration assembled from the command line and environment.
use std::{path::PathBuf, time::Duration};

use strum_macros::{Display, EnumString};

use crate::{
    cli::Cli,
    constants::FORWARDER_DRAIN_TIMEOUT,
    error::ConfigError,
    supervisor::StopPolicy,
};

/// Where relayed agent output and wrapper failures are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SinkKind {
    /// The host's system log: syslog on Unix, the event log on Windows.
    #[default]
    System,
    /// The wrapper's own log output.
    Console,
}

/// Validated settings for one service run.
#[derive(Debug, Clone)]
pub struct WrapperConfig {
    /// Name under which the service is registered with the host.
    pub service_name: String,
    /// Agent executable name without extension.
    pub agent: String,
    /// Directory holding the agent; `None` means next to the wrapper binary.
    pub agent_dir: Option<PathBuf>,
    /// Extra arguments passed to the agent.
    pub agent_args: Vec<String>,
    pub stop_policy: StopPolicy,
    pub sink: SinkKind,
}

impl WrapperConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let service_name = cli.service_name.trim();
        if service_name.is_empty() {
            return Err(ConfigError::Empty("Service name"));
        }

        let agent = match cli.agent.as_deref().map(str::trim) {
            Some("") => return Err(ConfigError::Empty("Agent name")),
            Some(agent) => agent.to_string(),
            None => service_name.to_string(),
        };

        let timeout = parse_duration(&cli.stop_timeout)?;
        let poll_interval = parse_duration(&cli.poll_interval)?;
        if poll_interval.is_zero() || poll_interval > timeout {
            return Err(ConfigError::PollInterval {
                poll: poll_interval,
                timeout,
            });
        }

        Ok(Self {
            service_name: service_name.to_string(),
            agent,
            agent_dir: cli.agent_dir.clone(),
            agent_args: cli.agent_args.clone(),
            stop_policy: StopPolicy {
                timeout,
                poll_interval,
                drain_timeout: FORWARDER_DRAIN_TIMEOUT,
            },
            sink: cli.sink,
        })
    }
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
/// A bare number is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let (amount_str, millis_per_unit) = if let Some(stripped) = value.strip_suffix("ms") {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1_000)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60_000)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3_600_000)
    } else {
        (value, 1_000)
    };

    let amount: u64 = amount_str
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(raw.to_string()))?;

    Ok(Duration::from_millis(amount.saturating_mul(millis_per_unit)))
}
