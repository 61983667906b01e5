//! Automated review stages.
//!
//! Each stage sends a fixed evaluation prompt to the configured reviewer and
//! expects `{score, issues, suggestions}` back. Reviewer trouble (call error,
//! timeout, unparseable answer) yields an advisory pass so provider
//! instability never blocks delivery.

use crate::config::ReviewConfig;
use crate::domain::{StageName, StageResult, TaskContext};
use crate::error::ReviewError;
use crate::obs::emit_review_degraded;
use crate::process::truncate_chars;
use crate::review::{parse_verdict, ProviderRegistry};

/// Minimum review score for a stage to pass.
pub const REVIEW_PASS_SCORE: u8 = 70;

/// Score given when the reviewer answered but the answer was unusable.
pub const UNPARSEABLE_SCORE: u8 = 75;

/// Score given when the reviewer could not be reached.
pub const UNAVAILABLE_SCORE: u8 = 80;

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{"score": <0-100>, "issues": ["..."], "suggestions": ["..."]}"#;

/// Stage-specific evaluation prompt.
pub fn system_prompt(stage: StageName, task: &TaskContext) -> String {
    let focus = match stage {
        StageName::Architecture => {
            "Evaluate the ARCHITECTURE of this change: module boundaries, coupling, \
             dependency direction, and whether new code fits the existing structure \
             instead of working around it."
        }
        StageName::Simplicity => {
            "Evaluate the SIMPLICITY of this change: unnecessary abstraction, dead code, \
             duplicated logic, and functions that are longer or more nested than the \
             problem requires."
        }
        StageName::ErrorAnalysis => {
            "Evaluate ERROR HANDLING in this change: unchecked failures, swallowed errors, \
             missing input validation, resource leaks, and edge cases that would crash \
             or corrupt state."
        }
        StageName::Completeness => {
            "Evaluate COMPLETENESS of this change against the task: missing requirements, \
             placeholder or stubbed code, TODOs standing in for behavior, and untested paths."
        }
        StageName::Compile | StageName::Tests => "Review this change.",
    };

    format!(
        "You are a strict code reviewer gating machine-authored changes.\n\
         Task ({task_type}): {description}\n\n\
         {focus}\n\
         Scores below {pass} fail the review.\n\n\
         {RESPONSE_FORMAT}",
        task_type = task.task_type,
        description = task.description,
        pass = REVIEW_PASS_SCORE,
    )
}

/// User message embedding the (size-capped) diff.
pub fn user_message(diff: &str, task: &TaskContext, max_diff_chars: usize) -> String {
    let capped = truncate_chars(diff, max_diff_chars);
    let note = if capped.len() < diff.len() {
        format!(
            "\n[diff truncated: showing {} of {} bytes]",
            capped.len(),
            diff.len()
        )
    } else {
        String::new()
    };
    format!(
        "Task {}: {}\n\nDiff:\n```diff\n{}\n```{}",
        task.task_id, task.description, capped, note
    )
}

/// Run one review stage. Never fails; reviewer trouble degrades to a pass.
pub async fn run_review_stage(
    reviewers: &ProviderRegistry,
    stage: StageName,
    diff: &str,
    task: &TaskContext,
    config: &ReviewConfig,
) -> StageResult {
    let system = system_prompt(stage, task);
    let user = user_message(diff, task, config.max_diff_chars);
    let timeout = std::time::Duration::from_millis(config.timeout_ms);

    let response = match tokio::time::timeout(timeout, reviewers.send(&system, &user, &config.model))
        .await
    {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => return degraded(stage, &config.model, &e, UNAVAILABLE_SCORE),
        Err(_) => {
            let e = ReviewError::Timeout {
                model: config.model.clone(),
                timeout_ms: config.timeout_ms,
            };
            return degraded(stage, &config.model, &e, UNAVAILABLE_SCORE);
        }
    };

    match parse_verdict(&response) {
        Ok(verdict) => {
            let score = verdict.score_u8();
            StageResult {
                score,
                passed: score >= REVIEW_PASS_SCORE,
                issues: verdict.issues,
                suggestions: verdict.suggestions,
                executed: true,
                tests: None,
            }
        }
        Err(e) => degraded(stage, &config.model, &e, UNPARSEABLE_SCORE),
    }
}

fn degraded(stage: StageName, model: &str, error: &ReviewError, score: u8) -> StageResult {
    emit_review_degraded(stage.as_str(), model, error);
    StageResult::pass(score).with_issue(format!(
        "Advisory: {stage} review unavailable ({error}); stage passed without review"
    ))
}
