//! Structured observability hooks for gate lifecycle events.
//!
//! Every gate decision is emitted as an `info!` event with a stable `event`
//! field so log scrapers can key on it. Verbosity follows `RUST_LOG`.

use tracing::{info, warn};

/// Span tagging every event of one pipeline run with its task and cycle.
///
/// ```ignore
/// run_cycle(...).instrument(task_span("task-42", 3)).await
/// ```
pub fn task_span(task_id: &str, cycle: u32) -> tracing::Span {
    tracing::info_span!("relaygate.pipeline", task_id = %task_id, cycle = cycle)
}

/// Emit event: a pipeline stage produced its result.
pub fn emit_stage_finished(stage: &str, score: u8, passed: bool, executed: bool) {
    info!(
        event = "gate.stage_finished",
        stage = %stage,
        score = score,
        passed = passed,
        executed = executed,
    );
}

/// Emit event: a hard stage failed and the remaining stages were skipped.
pub fn emit_short_circuit(stage: &str, reason: &str) {
    info!(event = "gate.short_circuit", stage = %stage, reason = %reason);
}

/// Emit event: the per-task pipeline finished.
pub fn emit_pipeline_finished(task_id: &str, score: u8, passed: bool, duration_ms: u64) {
    info!(
        event = "gate.pipeline_finished",
        task_id = %task_id,
        score = score,
        passed = passed,
        duration_ms = duration_ms,
    );
}

/// Emit event: a cache lookup was answered from memory.
pub fn emit_cache_hit(key: &str) {
    info!(event = "cache.hit", cache_key = %key);
}

/// Emit event: a check command ran to completion (or failed to).
pub fn emit_check_executed(kind: &str, key: &str, passed: bool, duration_ms: u64) {
    info!(
        event = "cache.check_executed",
        kind = %kind,
        cache_key = %key,
        passed = passed,
        duration_ms = duration_ms,
    );
}

/// Emit event: a test run failed once and is being retried.
pub fn emit_test_retry(cache_key: &str) {
    warn!(event = "tests.retry", cache_key = %cache_key);
}

/// Emit event: a review call degraded to an advisory pass.
pub fn emit_review_degraded(stage: &str, model: &str, error: &dyn std::fmt::Display) {
    warn!(event = "review.degraded", stage = %stage, model = %model, error = %error);
}

/// Emit event: the batch-level integration gate finished.
pub fn emit_integration_finished(passed: bool, broken_by: usize, duration_ms: u64) {
    info!(
        event = "integration.finished",
        passed = passed,
        broken_by = broken_by,
        duration_ms = duration_ms,
    );
}

/// Emit event: a best-effort integration step failed and was swallowed.
pub fn emit_integration_step_degraded(step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "integration.step_degraded", step = %step, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_span_enter() {
        let span = task_span("task-1", 1);
        let _entered = span.enter();
        emit_stage_finished("compile", 100, true, true);
    }
}
