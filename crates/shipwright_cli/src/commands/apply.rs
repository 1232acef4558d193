//! Apply a saved model response to a local directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use shipwright_ops::{
    parse_response, ApplyResult, LeafOutcome, LocalTree, OperationApplier, PassSignal,
    DEFAULT_MAX_DEPTH,
};

use super::{print_issues, read_input, ConsoleSink, CliError};

#[derive(Args)]
pub struct ApplyArgs {
    /// Directory to apply the operations to
    #[arg(short, long)]
    pub dir: PathBuf,

    /// File containing the model response (stdin when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Maximum operation nesting depth
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,
}

pub async fn execute(args: ApplyArgs) -> Result<()> {
    if !args.dir.is_dir() {
        return Err(CliError::InvalidInput(format!(
            "directory not found: {}",
            args.dir.display()
        ))
        .into());
    }

    let text = read_input(args.file.as_deref()).await?;
    let parsed = parse_response(&text);
    print_issues(&parsed);
    if parsed.tree.is_empty() {
        println!("ℹ️  Nothing to apply");
        return Ok(());
    }

    println!(
        "🔧 Applying {} operations to {}",
        parsed.tree.leaf_count(),
        args.dir.display()
    );
    let applier = OperationApplier::new(Arc::new(LocalTree::new(&args.dir)), Arc::new(ConsoleSink))
        .with_max_depth(args.max_depth);
    let result = applier.apply(&parsed.tree).await;

    print_result(&result);
    check_result(result)
}

fn print_result(result: &ApplyResult) {
    println!();
    for record in &result.records {
        match &record.outcome {
            LeafOutcome::Applied(detail) => println!("  ✓ {} {}: {}", record.kind, record.path, detail),
            LeafOutcome::Failed(detail) => println!("  ✗ {} {}: {}", record.kind, record.path, detail),
        }
    }
    for signal in &result.signals {
        match signal {
            PassSignal::Verified { message } => {
                println!("  ✓ Verified{}", message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())
            }
            PassSignal::RetryRequested { message, fixes, applied } => {
                println!("  ↻ Retry requested ({}/{} fixes applied): {}", applied, fixes, message)
            }
        }
    }
    println!("📊 {}", result.summary());
}

fn check_result(result: ApplyResult) -> Result<()> {
    let failed = result.failed();
    let result = result
        .into_result()
        .map_err(|e| CliError::RunFailed(format!("pass aborted: {}", e)))?;
    if failed > 0 {
        return Err(CliError::RunFailed(format!(
            "{} of {} operations failed",
            failed,
            result.records.len()
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_response_file() {
        let temp = tempfile::tempdir().unwrap();
        let response = temp.path().join("response.txt");
        std::fs::write(
            &response,
            r#"Here you go:
```json
{"operation": "CREATE_FILE", "path": "app/main.py", "content": "print('hi')\n"}
```"#,
        )
        .unwrap();
        let site = temp.path().join("site");
        std::fs::create_dir(&site).unwrap();

        execute(ApplyArgs {
            dir: site.clone(),
            file: Some(response),
            max_depth: DEFAULT_MAX_DEPTH,
        })
        .await
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(site.join("app/main.py")).unwrap(),
            "print('hi')\n"
        );
    }

    #[tokio::test]
    async fn test_failed_leaf_is_a_run_failure() {
        let temp = tempfile::tempdir().unwrap();
        let response = temp.path().join("response.txt");
        std::fs::write(
            &response,
            r#"{"operation": "DELETE_FILE", "path": "missing.py"}"#,
        )
        .unwrap();

        let err = execute(ApplyArgs {
            dir: temp.path().to_path_buf(),
            file: Some(response),
            max_depth: DEFAULT_MAX_DEPTH,
        })
        .await
        .unwrap_err();

        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::RunFailed(_))));
    }

    #[tokio::test]
    async fn test_missing_directory_is_invalid_input() {
        let err = execute(ApplyArgs {
            dir: PathBuf::from("/nonexistent/shipwright-site"),
            file: None,
            max_depth: DEFAULT_MAX_DEPTH,
        })
        .await
        .unwrap_err();

        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::InvalidInput(_))));
    }
}
