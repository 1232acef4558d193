//! Rendering a tree as prompt context.

use crate::error::OpsResult;
use crate::lines::Lines;
use crate::tree::TreeAccess;

/// Placeholder for a tree with no files.
pub const EMPTY_TREE: &str = "Repository is empty.";

/// Render every file with numbered lines so the model can address them.
///
/// ```text
/// === FILE: app.py ===
///    1 | import os
///    2 | print(os.getcwd())
/// ```
pub async fn format_codebase(tree: &dyn TreeAccess) -> OpsResult<String> {
    let files = tree.list_files().await?;
    if files.is_empty() {
        return Ok(EMPTY_TREE.to_string());
    }

    let mut out = Vec::with_capacity(files.len() * 3);
    for file in &files {
        let content = tree.read_file(&file.path).await?;
        out.push(format!("=== FILE: {} ===", file.path));
        out.push(number_lines(&content));
        out.push(String::new());
    }
    Ok(out.join("\n"))
}

/// Numbers follow [`Lines`], so they match what line operations address.
fn number_lines(content: &str) -> String {
    Lines::parse(content)
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:4} | {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}
