use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

/// `kind` of the protocol message that asks the daemon to run a build.
pub(crate) const BUILD_REQUEST: &str = "build";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept clients and print every stream of each connection.
    Serve(ServeArgs),
    /// Connect as a client and send messages.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit after serving N connections.
    #[arg(long)]
    pub count: Option<usize>,
    /// How long each receive waits before re-checking for shutdown (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub receive_timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Message to send, as tagged JSON (repeatable, sent in order).
    #[arg(long, value_name = "MESSAGE")]
    pub json: Vec<String>,
    /// Send a build request with this JSON payload.
    #[arg(long, value_name = "PAYLOAD")]
    pub build: Option<String>,
    /// Forward local stdin, then end-of-input, before any other message.
    #[arg(long)]
    pub stdin: bool,
    /// Send a cancel signal after the other messages.
    #[arg(long)]
    pub cancel: bool,
    /// Print replies until the daemon sends a result.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the result when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
