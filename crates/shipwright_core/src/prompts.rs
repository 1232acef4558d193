//! Prompt text sent to the generation collaborator.

use crate::collaborators::{DeploymentReport, VerificationSubject};

/// Number of trailing log lines included in prompts.
pub const LOG_TAIL: usize = 100;

/// System prompt describing the operation format, with the tree embedded.
pub fn system_prompt(codebase: &str) -> String {
    format!(
        r#"You are an expert software engineer and coder. Your task is to write, modify, and debug code based on user requirements.

CURRENT CODEBASE:
{codebase}

AVAILABLE OPERATIONS:
You can perform the following operations by responding in JSON format:

1. CREATE_FILE: Create a new file
   {{"operation": "CREATE_FILE", "path": "filename.py", "content": "file content here"}}

2. OVERWRITE_FILE: Replace entire file content
   {{"operation": "OVERWRITE_FILE", "path": "filename.py", "content": "new file content"}}

3. INSERT_LINES: Insert code at a specific line number
   {{"operation": "INSERT_LINES", "path": "filename.py", "line": 10, "content": "code to insert"}}

4. DELETE_FILE: Delete a file
   {{"operation": "DELETE_FILE", "path": "filename.py"}}

5. DELETE_LINES: Delete specific lines from a file
   {{"operation": "DELETE_LINES", "path": "filename.py", "start_line": 5, "end_line": 10}}

6. MULTIPLE_OPERATIONS: Perform multiple operations at once
   {{"operations": [
       {{"operation": "CREATE_FILE", "path": "file1.py", "content": "..."}},
       {{"operation": "INSERT_LINES", "path": "file2.py", "line": 5, "content": "..."}}
   ]}}

7. VERIFY_COMPLETE: Indicate you've verified the code and it's ready
   {{"operation": "VERIFY_COMPLETE", "message": "Code is correct and ready for deployment"}}

8. NEEDS_RETRY: Indicate issues found that need fixing, with fixes to apply
   {{"operation": "NEEDS_RETRY", "message": "Issue description", "fixes": [
       {{"operation": "OVERWRITE_FILE", "path": "file.py", "content": "..."}}
   ]}}

IMPORTANT RULES:
- Line numbers are 1-indexed (first line is line 1)
- When inserting at line N, content is inserted BEFORE that line
- Operations are applied in order; later operations see earlier edits
- Be precise with line numbers - verify them against the current codebase
- Always respond with valid JSON
- After deployment errors, analyze the error and provide fixes

Your goal is to create working, production-ready code that fulfills the user's requirements."#
    )
}

/// Pre-deployment review request.
pub const PRE_VERIFY_REQUEST: &str = "Please verify the above codebase is correct. \
If everything looks good, respond with VERIFY_COMPLETE operation. \
If there are issues, respond with NEEDS_RETRY operation with fixes.";

/// Number the last [`LOG_TAIL`] log lines.
pub fn format_logs(logs: &[String]) -> String {
    if logs.is_empty() {
        return "No logs available.".to_string();
    }
    let start = logs.len().saturating_sub(LOG_TAIL);
    logs[start..]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}. {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Review of a successful deployment.
pub fn deployment_review(report: &DeploymentReport) -> String {
    format!(
        "The code has been successfully deployed.\n\n\
Deployment Status: {}\n\
Deployment ID: {}\n\n\
Deployment Logs:\n{}\n\n\
Please review the deployment logs and confirm if the application is running correctly \
and doing what was intended. If it is, respond with VERIFY_COMPLETE. If there are any \
errors or issues, respond with NEEDS_RETRY and provide fixes using the operation format.",
        report.status,
        report.deployment_id.as_deref().unwrap_or("unknown"),
        format_logs(&report.logs)
    )
}

/// Request for fixes after a failed or timed-out deployment.
pub fn deployment_failure(report: &DeploymentReport) -> String {
    format!(
        "The deployment FAILED with status: {}\n\n\
Deployment Logs:\n{}\n\n\
Please analyze the error and provide fixes using the operation format to correct the issues.",
        report.status,
        format_logs(&report.logs)
    )
}

/// Re-prompt after a failed cycle.
pub fn retry_request(request: &str, context: &str) -> String {
    format!(
        "Original request:\n{}\n\nThe previous attempt did not succeed.\n\n{}",
        request, context
    )
}

/// Render the user turn for a verification request.
pub fn verification_prompt(subject: &VerificationSubject) -> String {
    match subject {
        VerificationSubject::Tree { .. } => PRE_VERIFY_REQUEST.to_string(),
        VerificationSubject::Deployment(report) if report.succeeded => deployment_review(report),
        VerificationSubject::Deployment(report) => deployment_failure(report),
    }
}
