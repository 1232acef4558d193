//! shipwright CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: Run failed
//! - 4: Deployment failure or timeout

use std::process::ExitCode;

use clap::Parser;
use shipwright_clients::ClientError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, CliError, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const RUN_FAILED: u8 = 3;
    pub const DEPLOYMENT_FAILURE: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "shipwright=debug"
    } else if cli.quiet {
        "shipwright=warn"
    } else {
        "shipwright=info"
    };
    let mut filter = EnvFilter::from_default_env();
    for directive in [level, "warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    // Already initialized in tests; nothing to do then.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Apply(args) => commands::apply::execute(args).await,
        Commands::Parse(args) => commands::parse::execute(args).await,
        Commands::CheckConfig(args) => commands::check_config::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(err) = e.downcast_ref::<CliError>() {
        return match err {
            CliError::InvalidInput(_) => ExitCodes::INVALID_ARGS,
            CliError::RunFailed(_) => ExitCodes::RUN_FAILED,
            CliError::DeploymentFailed(_) => ExitCodes::DEPLOYMENT_FAILURE,
        };
    }
    match e.downcast_ref::<ClientError>() {
        Some(ClientError::MissingConfig(_))
        | Some(ClientError::InvalidConfig(_))
        | Some(ClientError::Toml(_)) => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::GENERAL_ERROR,
    }
}
