//! CLI command definitions.
//!
//! Each subcommand maps to one way of driving the operation engine: the full
//! generate/deploy loop, or offline parsing and applying of a saved response.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shipwright_ops::{EventCategory, EventSink, ParsedResponse, ProgressEvent};
use thiserror::Error;
use tokio::io::AsyncReadExt;

pub mod apply;
pub mod check_config;
pub mod parse;
pub mod run;

/// shipwright - AI code generation, deployment and verification loop
#[derive(Parser)]
#[command(name = "shipwright")]
#[command(version, about = "shipwright - generate, deploy and verify code changes")]
#[command(long_about = r#"
shipwright sends a change request and the current repository to a language
model, applies the file operations it answers with, deploys, and feeds the
deployment logs back until the model confirms the result.

COMMANDS:
  run           → Full loop against the configured GitHub repo and Railway project
  apply         → Apply a saved model response to a local directory
  parse         → Show the validated operations found in a model response
  check-config  → Validate settings and reach the remote services

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or configuration
  3 - Run failed
  4 - Deployment failure or timeout
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the generate, deploy and verify loop for one request
    Run(run::RunArgs),

    /// Apply a model response to a local directory
    Apply(apply::ApplyArgs),

    /// Parse and validate a model response
    Parse(parse::ParseArgs),

    /// Validate settings and connectivity
    #[command(name = "check-config")]
    CheckConfig(check_config::CheckConfigArgs),
}

/// Failures that map to dedicated exit codes.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Run failed: {0}")]
    RunFailed(String),

    #[error("Deployment failed: {0}")]
    DeploymentFailed(String),
}

/// Read a model response from `file`, or from stdin when absent.
pub async fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

/// Print validation issues of a parsed response.
pub fn print_issues(parsed: &ParsedResponse) {
    if parsed.nothing_found() {
        println!("⚠️  No operations found in response");
    }
    for issue in &parsed.report.errors {
        println!("❌ {}", issue);
    }
    for issue in &parsed.report.warnings {
        println!("⚠️  {}", issue);
    }
}

pub fn format_event(event: &ProgressEvent) -> String {
    let marker = match event.category {
        EventCategory::Status => "•",
        EventCategory::Warning => "⚠️ ",
        EventCategory::Error => "❌",
        EventCategory::OperationSuccess => "✅",
    };
    format!("{} {}", marker, event.message)
}

/// Prints progress events as they arrive.
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: ProgressEvent) {
        println!("{}", format_event(&event));
    }
}
