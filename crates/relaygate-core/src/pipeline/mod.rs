//! Per-task quality gate pipeline.
//!
//! Stage order: compile, tests, test-first enforcement, then the four review
//! stages in parallel. A failing hard stage (compile or tests) returns
//! immediately; the review stages are never invoked on a failing binary gate
//! and keep their not-executed placeholders.

mod escalation;
mod review;
mod tdd;
mod tests_stage;

pub use escalation::{escalate, escalation_summary, MANUAL_REVIEW_REQUIRED};
pub use review::{
    run_review_stage, system_prompt, user_message, REVIEW_PASS_SCORE, UNAVAILABLE_SCORE,
    UNPARSEABLE_SCORE,
};
pub use tdd::{classify_diff, enforce_test_first, DiffFiles, TddPhase};
pub use tests_stage::{
    run_test_execution, TestExecution, FLAKY_SUGGESTION, MAX_TEST_ATTEMPTS, NO_TESTS_ISSUE,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CheckRequest, LocalCheckCache};
use crate::config::GateConfig;
use crate::domain::{
    CompileCheckResult, PipelineResult, StageName, StageResult, TaskContext, TestScope,
};
use crate::obs::{emit_pipeline_finished, emit_short_circuit, emit_stage_finished, task_span};
use crate::review::ProviderRegistry;
use crate::scoring::ScoringPolicy;

/// sha256 hex digest of a diff.
pub fn diff_digest(diff: &str) -> String {
    hex::encode(Sha256::digest(diff.as_bytes()))
}

/// Orchestrates one task's quality gate.
///
/// Owns the per-task cycle counter; the cache is shared with other pipelines
/// and the integration gate.
pub struct QualityGatePipeline {
    cache: Arc<LocalCheckCache>,
    reviewers: ProviderRegistry,
    scorer: Arc<dyn ScoringPolicy>,
    cycles: Mutex<HashMap<String, u32>>,
}

impl QualityGatePipeline {
    pub fn new(
        cache: Arc<LocalCheckCache>,
        reviewers: ProviderRegistry,
        scorer: Arc<dyn ScoringPolicy>,
    ) -> Self {
        Self {
            cache,
            reviewers,
            scorer,
            cycles: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<LocalCheckCache> {
        &self.cache
    }

    /// Pipeline runs recorded so far for `task_id`.
    pub fn cycle_count(&self, task_id: &str) -> u32 {
        self.lock_cycles().get(task_id).copied().unwrap_or(0)
    }

    /// Forget the cycle history of a task (for example once it is accepted).
    pub fn reset_cycles(&self, task_id: &str) {
        self.lock_cycles().remove(task_id);
    }

    fn next_cycle(&self, task_id: &str) -> u32 {
        let mut cycles = self.lock_cycles();
        let cycle = cycles.entry(task_id.to_string()).or_insert(0);
        *cycle += 1;
        *cycle
    }

    fn lock_cycles(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.cycles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Evaluate `diff` for `task`.
    pub async fn run_pipeline(
        &self,
        diff: &str,
        task: &TaskContext,
        config: &GateConfig,
    ) -> PipelineResult {
        let cycle = self.next_cycle(&task.task_id);
        self.run_cycle(diff, task, config, cycle)
            .instrument(task_span(&task.task_id, cycle))
            .await
    }

    async fn run_cycle(
        &self,
        diff: &str,
        task: &TaskContext,
        config: &GateConfig,
        cycle: u32,
    ) -> PipelineResult {
        let started = Instant::now();

        let mut stages: BTreeMap<StageName, StageResult> = StageName::ALL
            .iter()
            .map(|s| (*s, StageResult::placeholder()))
            .collect();

        if config.stages.compile {
            let req = CheckRequest::new(&task.working_dir, config.compile_timeout());
            let compile = self.cache.run_compile_check(&req).await;
            record(&mut stages, StageName::Compile, compile_stage(&compile));
            if !compile.passed {
                emit_short_circuit(StageName::Compile.as_str(), "compile check failed");
                return self.build_result(stages, diff, task, config, cycle, started);
            }
        }

        if config.stages.tests {
            let require_tests = task.is_feature()
                && config.tests.scope == TestScope::Affected
                && !config.tests.full_project_run;
            let exec = TestExecution {
                working_dir: &task.working_dir,
                full_project_run: config.tests.full_project_run,
                require_tests,
                baseline: Some(&config.baseline).filter(|b| b.enabled),
                scope: Some(config.tests.scope),
                timeout: config.test_timeout(),
            };
            let tests = run_test_execution(&self.cache, &exec).await;
            let passed = tests.passed;
            record(&mut stages, StageName::Tests, tests);
            if !passed {
                emit_short_circuit(StageName::Tests.as_str(), "test stage failed");
                return self.build_result(stages, diff, task, config, cycle, started);
            }
        }

        if config.enforce_tdd && task.is_feature() {
            let tdd = enforce_test_first(diff, task);
            if !tdd.passed {
                record(&mut stages, StageName::Completeness, tdd);
                emit_short_circuit("tdd", "test-first enforcement failed");
                return self.build_result(stages, diff, task, config, cycle, started);
            }
        }

        let enabled: Vec<StageName> = StageName::REVIEWS
            .into_iter()
            .filter(|s| config.stages.is_enabled(*s))
            .collect();
        let reviews = join_all(
            enabled
                .iter()
                .map(|s| run_review_stage(&self.reviewers, *s, diff, task, &config.review)),
        )
        .await;
        for (stage, result) in enabled.into_iter().zip(reviews) {
            record(&mut stages, stage, result);
        }

        self.build_result(stages, diff, task, config, cycle, started)
    }

    /// Ask the escalation reviewer for guidance on a failed run.
    pub async fn escalate(
        &self,
        result: &PipelineResult,
        diff: &str,
        task: &TaskContext,
        config: &GateConfig,
    ) -> String {
        escalate(&self.reviewers, result, diff, task, config).await
    }

    fn build_result(
        &self,
        stages: BTreeMap<StageName, StageResult>,
        diff: &str,
        task: &TaskContext,
        config: &GateConfig,
        cycle: u32,
        started: Instant,
    ) -> PipelineResult {
        let aggregate = self
            .scorer
            .score(&stages, &config.stages, &config.weights, config.pass_score);
        let duration_ms = started.elapsed().as_millis() as u64;

        emit_pipeline_finished(&task.task_id, aggregate.score, aggregate.passed, duration_ms);

        PipelineResult {
            run_id: Uuid::new_v4(),
            task_id: task.task_id.clone(),
            stages,
            score: aggregate.score,
            passed: aggregate.passed,
            cycle,
            needs_escalation: !aggregate.passed && cycle >= config.max_review_cycles,
            diff_digest: diff_digest(diff),
            timestamp: Utc::now(),
            duration_ms,
        }
    }
}

fn record(stages: &mut BTreeMap<StageName, StageResult>, name: StageName, result: StageResult) {
    emit_stage_finished(name.as_str(), result.score, result.passed, result.executed);
    stages.insert(name, result);
}

fn compile_stage(compile: &CompileCheckResult) -> StageResult {
    if compile.passed {
        let mut stage = StageResult::pass(100);
        stage.issues = compile.issues.clone();
        return stage;
    }

    let mut issues = Vec::with_capacity(compile.issues.len() + 2);
    issues.push(format!("{} compile error(s)", compile.error_count.max(1)));
    issues.extend(compile.issues.iter().cloned());
    issues.push(compile.metadata.diagnostics(1, 1));
    StageResult::fail(0, issues)
}
