//! Validate settings and, unless offline, contact GitHub and Railway.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use shipwright_clients::{GitHubTree, RailwayDeployer, Secret, Settings};

#[derive(Args)]
pub struct CheckConfigArgs {
    /// Settings file (defaults to ./shipwright.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only validate values, do not contact remote services
    #[arg(long)]
    pub offline: bool,
}

pub async fn execute(args: CheckConfigArgs) -> Result<()> {
    let settings = Settings::load(args.config.as_deref())?;

    println!("🔍 Checking configuration...");
    println!("   GitHub: {} ({})", settings.github.repo, settings.github.branch);
    println!("   Railway project: {}", settings.railway.project_id);
    println!("   Model: {} at {}", settings.llm.model, settings.llm.api_url);
    println!("   {} GitHub token", marker(&settings.github.token));
    println!("   {} Railway API key", marker(&settings.railway.api_key));
    println!("   {} DeepSeek API key", marker(&settings.llm.api_key));
    println!(
        "   Retries: {}, pre-verify rounds: {}, deployment timeout: {}s",
        settings.orchestrator.max_retries,
        settings.orchestrator.max_pre_verify_attempts,
        settings.orchestrator.deployment_timeout.as_secs()
    );

    settings.validate()?;
    println!("✅ Settings are valid");

    if args.offline {
        return Ok(());
    }

    let github = GitHubTree::new(&settings.github)?;
    let files = github
        .blob_paths()
        .await
        .context("GitHub repository is not reachable")?;
    println!("✅ GitHub: {} files on {}", files.len(), github.branch());

    let railway = RailwayDeployer::new(&settings.railway)?;
    match railway
        .latest_deployment()
        .await
        .context("Railway project is not reachable")?
    {
        Some(deployment) => println!(
            "✅ Railway: latest deployment {} is {}",
            deployment.id, deployment.status
        ),
        None => println!("✅ Railway: project {} has no deployments yet", railway.project_id()),
    }

    Ok(())
}

fn marker(secret: &Secret) -> &'static str {
    if secret.is_set() {
        "✓"
    } else {
        "✗"
    }
}
