//! tfprobe CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Every module run was successful
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: At least one module run failed

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tfprobe_core::ExecutionOutcome;

mod commands;
mod config;
mod report;

use commands::{Cli, Commands, LogFormat};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const RUN_FAILURE: u8 = 3;
}

/// Environment variable holding log filter directives.
const LOG_ENV: &str = "TFPROBE_LOG";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Exec(args) => commands::exec::execute(args).await,
        Commands::Stage(args) => commands::stage::execute(args)
            .await
            .map(|()| ExecutionOutcome::Successful),
    };

    match result {
        Ok(ExecutionOutcome::Successful) => ExitCode::from(ExitCodes::SUCCESS),
        Ok(ExecutionOutcome::Failed) => ExitCode::from(ExitCodes::RUN_FAILURE),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        // target prefix covers every tfprobe_* crate
        EnvFilter::new(format!("tfprobe={level},warn"))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let log_result = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    let msg = e.to_string().to_lowercase();

    if msg.contains("unknown module") || msg.contains("suite file") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
