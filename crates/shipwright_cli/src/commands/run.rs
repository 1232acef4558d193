//! Full generate, deploy and verify loop against the configured remotes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use shipwright_clients::{DeepSeekClient, GitHubTree, RailwayDeployer, Settings};
use shipwright_core::{FailureReason, Orchestrator, RunOutcome, RunRecord};
use shipwright_ops::{ChannelSink, EventSink, FanoutSink, TracingSink};
use tracing::{info, warn};

use super::{format_event, CliError};

#[derive(Args)]
pub struct RunArgs {
    /// Change request for the model
    #[arg(short, long, required_unless_present = "request_file", conflicts_with = "request_file")]
    pub request: Option<String>,

    /// Read the change request from a file
    #[arg(long)]
    pub request_file: Option<PathBuf>,

    /// Settings file (defaults to ./shipwright.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the retry budget
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Persist the run record to this directory after every step
    #[arg(long)]
    pub runs_dir: Option<PathBuf>,

    /// Also mirror progress events into the log
    #[arg(long)]
    pub log_events: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let request = match (&args.request, &args.request_file) {
        (Some(request), _) => request.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read request from {}", path.display()))?,
        (None, None) => {
            return Err(CliError::InvalidInput("a request is required".to_string()).into())
        }
    };
    if request.trim().is_empty() {
        return Err(CliError::InvalidInput("the request is empty".to_string()).into());
    }

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(retries) = args.max_retries {
        settings.orchestrator.max_retries = retries;
    }
    if let Some(dir) = args.runs_dir {
        settings.orchestrator.runs_dir = Some(dir);
    }
    settings.validate()?;

    println!("🚀 Running request against {} ({})", settings.github.repo, settings.github.branch);
    println!("   Model: {}", settings.llm.model);
    println!("   Railway project: {}", settings.railway.project_id);
    println!();

    let generator = Arc::new(DeepSeekClient::new(settings.llm.clone())?);
    let tree = Arc::new(GitHubTree::new(&settings.github)?);
    let deployer = Arc::new(RailwayDeployer::new(&settings.railway)?);

    let (channel, mut events) = ChannelSink::new();
    let mut sink = FanoutSink::new().with(Arc::new(channel));
    if args.log_events {
        sink = sink.with(Arc::new(TracingSink));
    }
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", format_event(&event));
        }
    });

    let runs_dir = settings.orchestrator.runs_dir.clone();
    let orchestrator = Orchestrator::new(generator, deployer, tree, sink, settings.orchestrator);

    let cancellation = orchestrator.cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run at the next step");
            cancellation.cancel();
        }
    });

    let record = orchestrator.run(&request).await;
    interrupt.abort();
    // Closes the event channel so the printer drains and exits.
    drop(orchestrator);
    let _ = printer.await;

    print_summary(&record);
    if let Some(dir) = runs_dir {
        info!("Run record saved to {}", record.record_path(&dir).display());
    }

    outcome_result(&record)?;
    Ok(())
}

fn print_summary(record: &RunRecord) {
    println!();
    println!("📋 Run {}", record.run_id);
    println!("   Phase: {}", record.phase);
    println!("   Retries: {}", record.retries);
    println!("   Operations applied: {}", record.total_applied);
    if let Some(report) = &record.last_report {
        println!("   Last deployment: {}", report.status);
    }
    match &record.outcome {
        Some(RunOutcome::Verified { message }) => {
            println!("✅ Deployment verified");
            if let Some(message) = message {
                println!("   {}", message);
            }
        }
        Some(RunOutcome::NoChanges) => println!("ℹ️  No code changes were needed"),
        Some(RunOutcome::Failed { reason }) => println!("❌ {}", reason),
        None => {}
    }
}

/// Map a finished run onto the CLI error that selects its exit code.
fn outcome_result(record: &RunRecord) -> Result<(), CliError> {
    let reason = match &record.outcome {
        Some(RunOutcome::Failed { reason }) => reason,
        Some(_) => return Ok(()),
        None => return Err(CliError::RunFailed(format!("run ended in {}", record.phase))),
    };

    let deployment_failed = record
        .last_report
        .as_ref()
        .map_or(false, |report| !report.succeeded);
    match reason {
        FailureReason::RetryBudgetExhausted { .. } if deployment_failed => {
            Err(CliError::DeploymentFailed(reason.to_string()))
        }
        _ => Err(CliError::RunFailed(reason.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_core::DeploymentReport;

    fn finished(outcome: RunOutcome) -> RunRecord {
        let mut record = RunRecord::new("add a route", "memory:test");
        record.finish(outcome);
        record
    }

    #[test]
    fn test_successful_outcomes() {
        assert!(outcome_result(&finished(RunOutcome::NoChanges)).is_ok());
        assert!(outcome_result(&finished(RunOutcome::Verified { message: None })).is_ok());
    }

    #[test]
    fn test_exhausted_budget_after_failed_deployment() {
        let mut record = finished(RunOutcome::Failed {
            reason: FailureReason::RetryBudgetExhausted {
                retries: 3,
                last_error: Some("CRASHED".into()),
            },
        });
        record.last_report = Some(DeploymentReport::timed_out(Some("d-1".into()), 900));

        assert!(matches!(
            outcome_result(&record),
            Err(CliError::DeploymentFailed(msg)) if msg.contains("3 retries")
        ));
    }

    #[test]
    fn test_other_failures_are_run_failures() {
        let record = finished(RunOutcome::Failed {
            reason: FailureReason::Cancelled,
        });
        assert!(matches!(outcome_result(&record), Err(CliError::RunFailed(_))));
    }
}
