use std::time::Duration;

use clap::{Args, Subcommand};
use hostlink_session::{SessionConfig, DEFAULT_PIPE_NAME};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod envinfo;
pub mod ping;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the host and serve ticks and calls until stopped.
    Run(RunArgs),
    /// Measure round trips to the host.
    Ping(PingArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Print build and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Ping(args) => ping::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

/// Where to connect and how long to wait for the host.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Pipe name or socket path of the host.
    #[arg(env = "HOSTLINK_PIPE", default_value = DEFAULT_PIPE_NAME)]
    pub pipe: String,
    /// Bound on the handshake and on each response (e.g. 5s, 500ms, 0 to wait forever).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

impl TargetArgs {
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        let timeout = parse_duration(&self.timeout)?;
        Ok(SessionConfig {
            handshake_timeout: timeout,
            response_timeout: timeout,
            ..SessionConfig::new(self.pipe.clone())
        })
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Register an int callback under NAME that returns its argument.
    #[arg(long, value_name = "NAME")]
    pub echo: Option<String>,
    /// Print TEXT on the host console after the handshake.
    #[arg(long, value_name = "TEXT")]
    pub print: Option<String>,
    /// Stop after N server ticks.
    #[arg(long, value_name = "N")]
    pub ticks: Option<u64>,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Number of round trips.
    #[arg(
        long,
        short = 'n',
        default_value = "4",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub count: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {}

/// Parse `5s`, `150ms` or bare seconds. Zero means no bound.
pub fn parse_duration(value: &str) -> CliResult<Option<Duration>> {
    let value = value.trim();
    let (digits, millis) = if let Some(ms) = value.strip_suffix("ms") {
        (ms, true)
    } else if let Some(secs) = value.strip_suffix('s') {
        (secs, false)
    } else {
        (value, false)
    };

    let amount: u64 = digits
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {value:?}")))?;
    if amount == 0 {
        return Ok(None);
    }
    Ok(Some(if millis {
        Duration::from_millis(amount)
    } else {
        Duration::from_secs(amount)
    }))
}
