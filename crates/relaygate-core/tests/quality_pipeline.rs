//! Behavioural tests for the per-task quality gate pipeline.

use std::sync::Arc;
use std::time::Duration;

use relaygate_core::fakes::{exit_fail, exit_ok, FixedScorer, Reply, ScriptedProvider, ScriptedRunner};
use relaygate_core::{
    BaselineConfig, GateConfig, LocalCheckCache, PipelineResult, ProviderRegistry,
    QualityGatePipeline, StageName, TaskContext, TaskType, MANUAL_REVIEW_REQUIRED,
};

const FEATURE_DIFF: &str = "\
diff --git a/src/auth.ts b/src/auth.ts
--- a/src/auth.ts
+++ b/src/auth.ts
@@ -1 +1,2 @@
+export const login = () => true;
diff --git a/src/auth.test.ts b/src/auth.test.ts
--- /dev/null
+++ b/src/auth.test.ts
@@ -0,0 +1,3 @@
+it('logs in', () => {
+  expect(login()).toBe(true);
+});
";

const IMPL_ONLY_DIFF: &str = "\
diff --git a/src/auth.ts b/src/auth.ts
--- a/src/auth.ts
+++ b/src/auth.ts
@@ -1 +1,2 @@
+export const login = () => true;
";

fn report(total: u32, failing: &[&str]) -> String {
    let failed = failing.len() as u32;
    let assertions: Vec<serde_json::Value> = failing
        .iter()
        .map(|name| {
            serde_json::json!({
                "fullName": name,
                "status": "failed",
                "failureMessages": ["AssertionError: boom"],
            })
        })
        .collect();
    serde_json::json!({
        "numTotalTests": total,
        "numPassedTests": total - failed,
        "numFailedTests": failed,
        "numPendingTests": 0,
        "numFailedTestSuites": if failed > 0 { 1 } else { 0 },
        "testResults": [{ "name": "src/auth.test.ts", "assertionResults": assertions }],
    })
    .to_string()
}

struct Harness {
    runner: Arc<ScriptedRunner>,
    provider: Arc<ScriptedProvider>,
    pipeline: QualityGatePipeline,
}

fn harness(runner: ScriptedRunner, provider: ScriptedProvider, score: u8) -> Harness {
    let runner = Arc::new(runner);
    let provider = Arc::new(provider);
    let cache = Arc::new(
        LocalCheckCache::new(
            runner.clone(),
            Default::default(),
            Duration::from_secs(300),
        )
        .unwrap(),
    );
    let registry = ProviderRegistry::new().with_fallback(provider.clone());
    let pipeline = QualityGatePipeline::new(cache, registry, Arc::new(FixedScorer::new(score)));
    Harness {
        runner,
        provider,
        pipeline,
    }
}

fn green_runner() -> ScriptedRunner {
    ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script("vitest", exit_ok(&report(6, &[])))
}

fn feature() -> TaskContext {
    TaskContext::new("task-1", "Add login", TaskType::Feature, "/repo")
}

fn stage(result: &PipelineResult, name: StageName) -> &relaygate_core::StageResult {
    result.stage(name).expect("every stage has an entry")
}

#[tokio::test]
async fn all_green_runs_every_stage() {
    let h = harness(green_runner(), ScriptedProvider::scoring(88), 90);
    let result = h
        .pipeline
        .run_pipeline(FEATURE_DIFF, &feature(), &GateConfig::default())
        .await;

    assert!(result.passed);
    assert_eq!(result.score, 90);
    assert_eq!(result.cycle, 1);
    assert_eq!(result.stages.len(), 6);
    for name in StageName::ALL {
        assert!(stage(&result, name).executed, "{name} should have run");
    }
    assert_eq!(stage(&result, StageName::Architecture).score, 88);
    assert_eq!(h.provider.call_count(), 4);
    assert_eq!(result.diff_digest.len(), 64);
}

#[tokio::test]
async fn compile_failure_never_invokes_reviews() {
    let runner = ScriptedRunner::new()
        .script("tsc", exit_fail(2, "src/auth.ts(1,1): error TS2304: Cannot find name 'x'."));
    let h = harness(runner, ScriptedProvider::scoring(100), 100);

    let result = h
        .pipeline
        .run_pipeline(FEATURE_DIFF, &feature(), &GateConfig::default())
        .await;

    assert!(!result.passed);
    let compile = stage(&result, StageName::Compile);
    assert!(!compile.passed);
    assert!(compile.issues.iter().any(|i| i.contains("error TS2304")));
    assert!(compile.issues.last().unwrap().starts_with("Diagnostics: "));

    for name in StageName::REVIEWS {
        let review = stage(&result, name);
        assert!(!review.executed);
        assert!(review.passed);
    }
    assert!(!stage(&result, StageName::Tests).executed);
    assert_eq!(h.provider.call_count(), 0);
    assert_eq!(h.runner.call_count("vitest"), 0);
}

#[tokio::test]
async fn flaky_suite_passes_on_retry_with_suggestion() {
    let runner = ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script("vitest", exit_fail(1, &report(6, &["auth > login"])))
        .script("vitest", exit_ok(&report(6, &[])));
    let h = harness(runner, ScriptedProvider::scoring(90), 90);

    let result = h
        .pipeline
        .run_pipeline(FEATURE_DIFF, &feature(), &GateConfig::default())
        .await;

    let tests = stage(&result, StageName::Tests);
    assert!(tests.passed);
    assert!(tests
        .suggestions
        .iter()
        .any(|s| s.contains("Flaky test behavior detected")));
    assert!(result.passed);
    assert_eq!(h.runner.call_count("vitest"), 2);
}

#[tokio::test]
async fn two_failures_fail_with_attempt_two_diagnostics() {
    let runner = ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script("vitest", exit_fail(1, &report(6, &["auth > login"])));
    let h = harness(runner, ScriptedProvider::scoring(90), 90);

    let result = h
        .pipeline
        .run_pipeline(FEATURE_DIFF, &feature(), &GateConfig::default())
        .await;

    assert!(!result.passed);
    let tests = stage(&result, StageName::Tests);
    assert!(!tests.passed);
    let diagnostics = tests
        .issues
        .iter()
        .find(|i| i.starts_with("Diagnostics: "))
        .expect("diagnostics line");
    assert!(diagnostics.contains("attempt=2/2"));
    assert!(diagnostics.contains("cacheKey=/repo::tests::affected"));
    assert!(diagnostics.contains("cacheHit=false"));
    assert_eq!(h.provider.call_count(), 0);
}

#[tokio::test]
async fn zero_tests_fail_feature_in_affected_scope() {
    let runner = ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script("vitest", exit_ok(&report(0, &[])));
    let h = harness(runner, ScriptedProvider::scoring(90), 90);

    let result = h
        .pipeline
        .run_pipeline(FEATURE_DIFF, &feature(), &GateConfig::default())
        .await;

    let tests = stage(&result, StageName::Tests);
    assert!(!tests.passed);
    assert_eq!(tests.score, 0);
    assert!(tests.issues.iter().any(|i| i.contains("feature tasks require tests")));
    assert!(!tests.suggestions.is_empty());
    assert!(!result.passed);
}

#[tokio::test]
async fn zero_tests_pass_for_non_feature_tasks() {
    let runner = ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script("vitest", exit_ok(&report(0, &[])));
    let h = harness(runner, ScriptedProvider::scoring(90), 90);
    let task = TaskContext::new("task-2", "Rename helpers", TaskType::Refactor, "/repo");

    let result = h
        .pipeline
        .run_pipeline(IMPL_ONLY_DIFF, &task, &GateConfig::default())
        .await;

    let tests = stage(&result, StageName::Tests);
    assert!(tests.passed);
    assert_eq!(tests.score, 100);
    assert!(result.passed);
}

#[tokio::test]
async fn known_failures_pass_in_baseline_mode() {
    let runner = ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script("vitest", exit_fail(1, &report(6, &["legacy > clock drift"])));
    let h = harness(runner, ScriptedProvider::scoring(90), 90);
    let config = GateConfig {
        baseline: BaselineConfig::with_known_failures(["legacy > clock drift"]),
        ..GateConfig::default()
    };

    let result = h.pipeline.run_pipeline(FEATURE_DIFF, &feature(), &config).await;

    let tests = stage(&result, StageName::Tests);
    assert!(tests.passed);
    assert!(tests.suggestions.iter().any(|s| s.contains("baseline-aware mode")));
    assert!(result.passed);
}

#[tokio::test]
async fn long_list_of_known_failures_passes_in_baseline_mode() {
    let known: Vec<String> = (0..25).map(|i| format!("legacy > case {i:02}")).collect();
    let failing: Vec<&str> = known.iter().map(String::as_str).collect();
    let runner = ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script("vitest", exit_fail(1, &report(40, &failing)));
    let h = harness(runner, ScriptedProvider::scoring(90), 90);
    let config = GateConfig {
        baseline: BaselineConfig::with_known_failures(known.clone()),
        ..GateConfig::default()
    };
    let task = TaskContext::new("task-2", "Fix clock", TaskType::Bugfix, "/repo");

    let result = h.pipeline.run_pipeline(FEATURE_DIFF, &task, &config).await;

    let tests = stage(&result, StageName::Tests);
    assert!(tests.passed, "issues: {:?}", tests.issues);
    assert_eq!(tests.score, 100);
    assert!(tests
        .suggestions
        .iter()
        .any(|s| s.contains("Ignored 25 known failing test(s)")));
}

#[tokio::test]
async fn unknown_failure_is_not_suppressed_by_baseline() {
    let runner = ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script(
            "vitest",
            exit_fail(1, &report(6, &["legacy > clock drift", "auth > login"])),
        );
    let h = harness(runner, ScriptedProvider::scoring(90), 90);
    let config = GateConfig {
        baseline: BaselineConfig::with_known_failures(["legacy > clock drift"]),
        ..GateConfig::default()
    };

    let result = h.pipeline.run_pipeline(FEATURE_DIFF, &feature(), &config).await;
    assert!(!stage(&result, StageName::Tests).passed);
}

#[tokio::test]
async fn implementation_without_tests_fails_completeness() {
    let h = harness(green_runner(), ScriptedProvider::scoring(90), 90);

    let result = h
        .pipeline
        .run_pipeline(IMPL_ONLY_DIFF, &feature(), &GateConfig::default())
        .await;

    let completeness = stage(&result, StageName::Completeness);
    assert!(!completeness.passed);
    assert!(completeness.executed);
    assert!(completeness.issues[0].contains("without test files"));
    assert!(!stage(&result, StageName::Architecture).executed);
    assert_eq!(h.provider.call_count(), 0);
}

#[tokio::test]
async fn tdd_can_be_disabled() {
    let h = harness(green_runner(), ScriptedProvider::scoring(90), 90);
    let config = GateConfig {
        enforce_tdd: false,
        ..GateConfig::default()
    };

    let result = h.pipeline.run_pipeline(IMPL_ONLY_DIFF, &feature(), &config).await;
    assert!(stage(&result, StageName::Completeness).passed);
    assert_eq!(h.provider.call_count(), 4);
}

#[tokio::test]
async fn review_failures_degrade_to_advisory_passes() {
    let provider = ScriptedProvider::scoring(85)
        .when("ARCHITECTURE", Reply::Error("503 upstream".to_string()))
        .when("SIMPLICITY", Reply::Text("I think this is fine.".to_string()))
        .when("ERROR HANDLING", Reply::Text(r#"{"score": 40, "issues": ["unwrap on user input"], "suggestions": []}"#.to_string()));
    let h = harness(green_runner(), provider, 90);

    let result = h
        .pipeline
        .run_pipeline(FEATURE_DIFF, &feature(), &GateConfig::default())
        .await;

    let arch = stage(&result, StageName::Architecture);
    assert!(arch.passed);
    assert_eq!(arch.score, 80);
    assert!(arch.issues[0].starts_with("Advisory"));

    let simplicity = stage(&result, StageName::Simplicity);
    assert!(simplicity.passed);
    assert_eq!(simplicity.score, 75);

    let errors = stage(&result, StageName::ErrorAnalysis);
    assert!(!errors.passed);
    assert_eq!(errors.issues, vec!["unwrap on user input"]);

    assert!(stage(&result, StageName::Completeness).passed);
}

#[tokio::test(start_paused = true)]
async fn reviews_run_concurrently() {
    let provider = ScriptedProvider::scoring(90).with_delay(Duration::from_secs(10));
    let h = harness(green_runner(), provider, 90);

    let started = tokio::time::Instant::now();
    let result = h
        .pipeline
        .run_pipeline(FEATURE_DIFF, &feature(), &GateConfig::default())
        .await;

    assert!(result.passed);
    assert_eq!(h.provider.call_count(), 4);
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn hanging_reviewer_times_out_to_advisory_pass() {
    let provider = ScriptedProvider::scoring(90).when("COMPLETENESS", Reply::Hang);
    let h = harness(green_runner(), provider, 90);
    let mut config = GateConfig::default();
    config.review.timeout_ms = 1_000;

    let result = h.pipeline.run_pipeline(FEATURE_DIFF, &feature(), &config).await;

    let completeness = stage(&result, StageName::Completeness);
    assert!(completeness.passed);
    assert_eq!(completeness.score, 80);
    assert!(completeness.issues[0].contains("timed out"));
}

#[tokio::test]
async fn disabled_stages_stay_placeholders() {
    let h = harness(green_runner(), ScriptedProvider::scoring(90), 90);
    let mut config = GateConfig::default();
    config.stages.simplicity = false;
    config.stages.compile = false;

    let result = h.pipeline.run_pipeline(FEATURE_DIFF, &feature(), &config).await;

    assert!(!stage(&result, StageName::Simplicity).executed);
    assert!(!stage(&result, StageName::Compile).executed);
    assert_eq!(h.runner.call_count("tsc"), 0);
    assert_eq!(h.provider.call_count(), 3);
}

#[tokio::test]
async fn cycles_count_per_task_and_trigger_escalation() {
    let h = harness(green_runner(), ScriptedProvider::scoring(90), 40);
    let config = GateConfig {
        max_review_cycles: 2,
        ..GateConfig::default()
    };

    let first = h.pipeline.run_pipeline(FEATURE_DIFF, &feature(), &config).await;
    assert_eq!(first.cycle, 1);
    assert!(!first.passed);
    assert!(!first.needs_escalation);

    let second = h.pipeline.run_pipeline(FEATURE_DIFF, &feature(), &config).await;
    assert_eq!(second.cycle, 2);
    assert!(second.needs_escalation);
    assert_ne!(first.run_id, second.run_id);

    let other = TaskContext::new("task-9", "Other", TaskType::Feature, "/repo");
    let third = h.pipeline.run_pipeline(FEATURE_DIFF, &other, &config).await;
    assert_eq!(third.cycle, 1);

    h.pipeline.reset_cycles("task-1");
    assert_eq!(h.pipeline.cycle_count("task-1"), 0);
}

#[tokio::test]
async fn escalation_returns_reviewer_guidance() {
    let h = harness(green_runner(), ScriptedProvider::scoring(90), 40);
    let config = GateConfig::default();
    let result = h.pipeline.run_pipeline(FEATURE_DIFF, &feature(), &config).await;

    let h2 = harness(
        green_runner(),
        ScriptedProvider::new(Reply::Text("Split the login handler.".to_string())),
        40,
    );
    let guidance = h2.pipeline.escalate(&result, FEATURE_DIFF, &feature(), &config).await;
    assert_eq!(guidance, "Split the login handler.");
    assert_eq!(h2.provider.models(), vec!["claude-opus-4"]);
}

#[tokio::test]
async fn escalation_failure_requires_manual_review() {
    let h = harness(
        green_runner(),
        ScriptedProvider::new(Reply::Error("quota exceeded".to_string())),
        40,
    );
    let config = GateConfig::default();
    let result = h.pipeline.run_pipeline(FEATURE_DIFF, &feature(), &config).await;

    let guidance = h.pipeline.escalate(&result, FEATURE_DIFF, &feature(), &config).await;
    assert_eq!(guidance, MANUAL_REVIEW_REQUIRED);
}
