use std::{error::Error, process::ExitCode};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use systemg_wrapper::{
    cli::{Cli, parse_args},
    config::WrapperConfig,
    host,
};

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let config = WrapperConfig::from_cli(&args)?;
    let result = host::run(config);
    match &result {
        Ok(outcome) => info!("Service exited: {outcome:?}"),
        Err(err) => error!("Service host failed: {err}"),
    }

    Ok(ExitCode::from(host::exit_code(&result)))
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
