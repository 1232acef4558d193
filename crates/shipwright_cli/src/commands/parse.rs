//! Parse a model response and print the validated operation tree.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use shipwright_ops::{parse_response, ParsedResponse};

use super::{print_issues, read_input, CliError};

#[derive(Args)]
pub struct ParseArgs {
    /// File containing the model response (stdin when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Fail when validation reported errors
    #[arg(long)]
    pub strict: bool,
}

pub async fn execute(args: ParseArgs) -> Result<()> {
    let text = read_input(args.file.as_deref()).await?;
    let parsed = parse_response(&text);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
    } else {
        print_tree(&parsed);
        print_issues(&parsed);
    }

    if args.strict && !parsed.report.errors.is_empty() {
        return Err(CliError::InvalidInput(format!(
            "{} invalid operations",
            parsed.report.errors.len()
        ))
        .into());
    }
    Ok(())
}

fn print_tree(parsed: &ParsedResponse) {
    println!(
        "📦 {} payloads, {} leaf operations, depth {}",
        parsed.payloads,
        parsed.tree.leaf_count(),
        parsed.tree.depth()
    );
    for operation in &parsed.tree.operations {
        println!("  {}", operation.describe());
    }
}
