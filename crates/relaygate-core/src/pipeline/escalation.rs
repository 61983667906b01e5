//! Escalation to a more capable reviewer after repeated failed cycles.

use std::fmt::Write as _;

use tracing::warn;

use crate::config::GateConfig;
use crate::domain::{PipelineResult, TaskContext};
use crate::process::truncate_chars;
use crate::review::ProviderRegistry;

/// Returned whenever the escalation reviewer cannot be used.
pub const MANUAL_REVIEW_REQUIRED: &str = "Manual review required";

const MAX_ESCALATION_ISSUES: usize = 15;

const ESCALATION_PROMPT: &str = "You are a senior engineer. A machine-authored change has \
failed automated quality review several times. Diagnose the root cause from the summary and \
diff, then give concrete, ordered instructions to get the change accepted.";

/// Diagnostic summary of a failed pipeline run.
pub fn escalation_summary(result: &PipelineResult, task: &TaskContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Task {}: {}", task.task_id, task.description);
    let _ = writeln!(
        out,
        "Aggregate score: {}/100 after {} cycle(s)",
        result.score, result.cycle
    );

    let failing: Vec<&str> = result.failing_stages().iter().map(|s| s.as_str()).collect();
    let _ = writeln!(
        out,
        "Failing stages: {}",
        if failing.is_empty() {
            "none".to_string()
        } else {
            failing.join(", ")
        }
    );

    let issues = result.issue_digest();
    if !issues.is_empty() {
        let _ = writeln!(out, "Issues:");
        for issue in issues.iter().take(MAX_ESCALATION_ISSUES) {
            let _ = writeln!(out, "- {issue}");
        }
        if issues.len() > MAX_ESCALATION_ISSUES {
            let _ = writeln!(out, "- ... {} more", issues.len() - MAX_ESCALATION_ISSUES);
        }
    }
    out
}

/// Ask the escalation model for guidance. Never fails.
pub async fn escalate(
    reviewers: &ProviderRegistry,
    result: &PipelineResult,
    diff: &str,
    task: &TaskContext,
    config: &GateConfig,
) -> String {
    let model = &config.review.escalation_model;
    let message = format!(
        "{}\nDiff:\n```diff\n{}\n```",
        escalation_summary(result, task),
        truncate_chars(diff, config.review.max_diff_chars)
    );

    let call = reviewers.send(ESCALATION_PROMPT, &message, model);
    match tokio::time::timeout(config.review_timeout(), call).await {
        Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(Ok(_)) => {
            warn!(event = "review.escalation_failed", model = %model, error = "empty response");
            MANUAL_REVIEW_REQUIRED.to_string()
        }
        Ok(Err(e)) => {
            warn!(event = "review.escalation_failed", model = %model, error = %e);
            MANUAL_REVIEW_REQUIRED.to_string()
        }
        Err(_) => {
            warn!(event = "review.escalation_failed", model = %model, error = "timeout");
            MANUAL_REVIEW_REQUIRED.to_string()
        }
    }
}
