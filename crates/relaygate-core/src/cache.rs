//! Local check cache.
//!
//! Memoizes the expensive compile and test invocations shared by the quality
//! pipeline and the integration gate. Entries are keyed by a string combining
//! working directory, check kind and test scope, and expire after a TTL
//! (5 minutes by default). An entry read after it expired is evicted and
//! treated as absent.
//!
//! Concurrent misses on an identical key are coalesced: the second caller
//! waits for the first and is answered from the fresh entry.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{CheckCommands, GateConfig};
use crate::domain::{CheckKind, CheckMetadata, CompileCheckResult, TestScope, TestSuiteResult};
use crate::error::{GateError, Result};
use crate::obs::{emit_cache_hit, emit_check_executed};
use crate::process::{
    truncate_chars, CommandOutput, CommandRunner, CommandSpec, ProcessOutcome, ToolingFailureKind,
};
use crate::test_report::{
    has_failure_marker, parse_json_report, parse_text_summary, ParsedTestRun, MAX_FAILING_TESTS,
};

/// Default time-to-live for cached check results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Compiler error lines carried in a result's issue list.
const MAX_COMPILE_ISSUES: usize = 50;

/// Raw output retained on a result.
const MAX_RAW_OUTPUT_BYTES: usize = 64 * 1024;

/// Raw output lines copied into the issues of a generic failure.
const GENERIC_FAILURE_LINES: usize = 20;

/// A cached value and the instant after which it is stale.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// String-keyed map whose entries expire after a fixed TTL.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Live value for `key`; an expired entry is evicted.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Insert or overwrite the entry for `key`.
    pub fn insert(&self, key: &str, value: T) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.lock().insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn retain_keys(&self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|k, _| keep(k));
        before - entries.len()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        // A poisoned map only means a panic mid-insert; the data is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Parameters for one compile or test check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Explicit cache key; derived from the directory and scope when absent.
    pub cache_key: Option<String>,
    /// Skip the cache read. The fresh result is still written back.
    pub force_refresh: bool,
    /// Run only tests affected by changed files.
    pub changed_only: bool,
}

impl CheckRequest {
    pub fn new(working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            working_dir: working_dir.into(),
            timeout,
            cache_key: None,
            force_refresh: false,
            changed_only: false,
        }
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn changed_only(mut self, changed_only: bool) -> Self {
        self.changed_only = changed_only;
        self
    }

    pub fn scope(&self) -> TestScope {
        if self.changed_only {
            TestScope::Affected
        } else {
            TestScope::Full
        }
    }
}

/// Build the cache key for a (working dir, kind, scope) triple.
pub fn cache_key(working_dir: &Path, kind: CheckKind, scope: TestScope) -> String {
    format!(
        "{}::{}::{}",
        working_dir.display(),
        kind.as_str(),
        scope.as_str()
    )
}

/// Cache shared by the quality pipeline and the integration gate.
pub struct LocalCheckCache {
    runner: Arc<dyn CommandRunner>,
    commands: CheckCommands,
    compiler_error_re: Regex,
    compile: TtlCache<CompileCheckResult>,
    tests: TtlCache<TestSuiteResult>,
    inflight: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalCheckCache {
    pub fn new(runner: Arc<dyn CommandRunner>, commands: CheckCommands, ttl: Duration) -> Result<Self> {
        let compiler_error_re = Regex::new(&commands.compiler_error_pattern).map_err(|e| {
            GateError::InvalidConfig(format!("compiler_error_pattern is not a valid regex: {e}"))
        })?;
        Ok(Self {
            runner,
            commands,
            compiler_error_re,
            compile: TtlCache::new(ttl),
            tests: TtlCache::new(ttl),
            inflight: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &GateConfig) -> Result<Self> {
        Self::new(runner, config.commands.clone(), config.cache.ttl())
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    pub fn commands(&self) -> &CheckCommands {
        &self.commands
    }

    /// Run the project's compiler in no-emit mode, through the cache.
    pub async fn run_compile_check(&self, req: &CheckRequest) -> CompileCheckResult {
        let key = req
            .cache_key
            .clone()
            .unwrap_or_else(|| cache_key(&req.working_dir, CheckKind::Compile, TestScope::Full));

        self.cached(
            &self.compile,
            &key,
            req.force_refresh,
            CompileCheckResult::as_cache_hit,
            || self.execute_compile(req, &key),
        )
        .await
    }

    /// Run the test suite with a JSON reporter, through the cache.
    ///
    /// Affected-scope runs never share an entry with full-suite runs.
    pub async fn run_test_suite(&self, req: &CheckRequest) -> TestSuiteResult {
        let key = match (&req.cache_key, req.changed_only) {
            (Some(k), true) => format!("{k}::affected"),
            (Some(k), false) => k.clone(),
            (None, _) => cache_key(&req.working_dir, CheckKind::Tests, req.scope()),
        };

        self.cached(
            &self.tests,
            &key,
            req.force_refresh,
            TestSuiteResult::as_cache_hit,
            || self.execute_tests(req, &key),
        )
        .await
    }

    /// Drop a single entry from both maps.
    pub fn invalidate(&self, key: &str) -> bool {
        let a = self.compile.remove(key);
        let b = self.tests.remove(key);
        a || b
    }

    /// Drop every entry belonging to `working_dir`.
    pub fn invalidate_dir(&self, working_dir: &Path) -> usize {
        let prefix = format!("{}::", working_dir.display());
        self.compile.retain_keys(|k| !k.starts_with(&prefix))
            + self.tests.retain_keys(|k| !k.starts_with(&prefix))
    }

    pub fn purge_expired(&self) -> usize {
        self.compile.purge_expired() + self.tests.purge_expired()
    }

    pub fn clear(&self) {
        self.compile.clear();
        self.tests.clear();
    }

    pub fn len(&self) -> usize {
        self.compile.len() + self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn cached<T, F, Fut>(
        &self,
        cache: &TtlCache<T>,
        key: &str,
        force_refresh: bool,
        mark_hit: fn(&T) -> T,
        compute: F,
    ) -> T
    where
        T: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !force_refresh {
            if let Some(value) = cache.get(key) {
                emit_cache_hit(key);
                return mark_hit(&value);
            }
        }

        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.to_string()).or_default())
        };
        let value = {
            let _guard = key_lock.lock().await;
            // Another caller may have filled the entry while we waited.
            match cache.get(key).filter(|_| !force_refresh) {
                Some(value) => {
                    emit_cache_hit(key);
                    mark_hit(&value)
                }
                None => {
                    let value = compute().await;
                    cache.insert(key, value.clone());
                    value
                }
            }
        };
        drop(key_lock);
        self.release_key_lock(key).await;
        value
    }

    /// Remove the per-key lock once no other caller holds or waits on it.
    async fn release_key_lock(&self, key: &str) {
        let mut inflight = self.inflight.lock().await;
        if inflight.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            inflight.remove(key);
        }
    }

    fn metadata(&self, spec: &CommandSpec, req: &CheckRequest, key: &str) -> CheckMetadata {
        CheckMetadata {
            command: spec.display(),
            working_dir: req.working_dir.display().to_string(),
            timeout_ms: req.timeout.as_millis() as u64,
            cache_key: key.to_string(),
            cache_hit: false,
        }
    }

    async fn execute_compile(&self, req: &CheckRequest, key: &str) -> CompileCheckResult {
        let spec = CommandSpec::from_argv(&self.commands.compile, &req.working_dir, req.timeout);
        let metadata = self.metadata(&spec, req, key);
        debug!(command = %metadata.command, cwd = %metadata.working_dir, "running compile check");

        let outcome = self.runner.run(&spec).await;
        let duration_ms = outcome.output().map(|o| o.duration_ms).unwrap_or(0);
        let result = match outcome {
            ProcessOutcome::Ok(out) => CompileCheckResult {
                passed: true,
                error_count: 0,
                issues: Vec::new(),
                raw_output: cap_raw(out.combined()),
                metadata,
            },
            ProcessOutcome::CorrectnessFailure(out) => {
                let combined = out.combined();
                let errors: Vec<String> = combined
                    .lines()
                    .filter(|l| self.compiler_error_re.is_match(l))
                    .map(|l| l.trim().to_string())
                    .collect();

                if !errors.is_empty() {
                    CompileCheckResult {
                        passed: false,
                        error_count: errors.len(),
                        issues: errors.into_iter().take(MAX_COMPILE_ISSUES).collect(),
                        raw_output: cap_raw(combined),
                        metadata,
                    }
                } else if self.commands.strict_compile_output && !combined.trim().is_empty() {
                    let mut issues = vec![format!("Compiler exited with code {}", out.exit_code)];
                    issues.extend(head_lines(&combined, GENERIC_FAILURE_LINES));
                    CompileCheckResult {
                        passed: false,
                        error_count: 1,
                        issues,
                        raw_output: cap_raw(combined),
                        metadata,
                    }
                } else {
                    warn!(
                        event = "compile.unrecognized_output",
                        exit_code = out.exit_code,
                        cache_key = %key,
                        "compiler exited non-zero without a recognizable error line; treating as pass"
                    );
                    CompileCheckResult {
                        passed: true,
                        error_count: 0,
                        issues: Vec::new(),
                        raw_output: cap_raw(combined),
                        metadata,
                    }
                }
            }
            ProcessOutcome::ToolingFailure(f) => match f.kind {
                ToolingFailureKind::TimedOut => CompileCheckResult {
                    passed: false,
                    error_count: 1,
                    issues: vec![format!(
                        "Compile check timed out after {}ms",
                        metadata.timeout_ms
                    )],
                    raw_output: f.message,
                    metadata,
                },
                ToolingFailureKind::SpawnFailed => {
                    warn!(event = "compile.tooling_failure", error = %f.message);
                    CompileCheckResult {
                        passed: true,
                        error_count: 0,
                        issues: vec![format!("Compile check skipped: {}", f.message)],
                        raw_output: f.message,
                        metadata,
                    }
                }
            },
        };

        emit_check_executed(CheckKind::Compile.as_str(), key, result.passed, duration_ms);
        result
    }

    async fn execute_tests(&self, req: &CheckRequest, key: &str) -> TestSuiteResult {
        let mut argv = self.commands.test.clone();
        if req.changed_only {
            argv.extend(self.commands.affected_args.iter().cloned());
        }
        let spec = CommandSpec::from_argv(&argv, &req.working_dir, req.timeout);
        let metadata = self.metadata(&spec, req, key);
        debug!(command = %metadata.command, cwd = %metadata.working_dir, "running test suite");

        let outcome = self.runner.run(&spec).await;
        let duration_ms = outcome.output().map(|o| o.duration_ms).unwrap_or(0);
        let result = match outcome {
            ProcessOutcome::Ok(out) => interpret_test_output(&out, true, metadata),
            ProcessOutcome::CorrectnessFailure(out) => interpret_test_output(&out, false, metadata),
            ProcessOutcome::ToolingFailure(f) => {
                let (passed, issue) = match f.kind {
                    ToolingFailureKind::TimedOut => (
                        false,
                        format!("Test run timed out after {}ms", metadata.timeout_ms),
                    ),
                    ToolingFailureKind::SpawnFailed => {
                        warn!(event = "tests.tooling_failure", error = %f.message);
                        (true, format!("Test run skipped: {}", f.message))
                    }
                };
                let mut result = empty_suite(passed, f.message, metadata);
                result.issues.push(issue);
                result
            }
        };

        emit_check_executed(CheckKind::Tests.as_str(), key, result.passed, duration_ms);
        result
    }
}

/// Structured report first, then the text summary, then the exit status.
fn interpret_test_output(out: &CommandOutput, exited_ok: bool, metadata: CheckMetadata) -> TestSuiteResult {
    let combined = out.combined();
    if let Some(run) = parse_json_report(&out.stdout).or_else(|| parse_text_summary(&combined)) {
        return from_parsed(run, cap_raw(combined), metadata);
    }

    if exited_ok {
        let failed = has_failure_marker(&combined);
        let mut result = empty_suite(!failed, cap_raw(combined), metadata);
        if failed {
            result.num_failed = 1;
            result
                .issues
                .push("Test output reported failures (no structured report found)".to_string());
        }
        return result;
    }

    let mut issues = vec![format!("Test runner exited with code {}", out.exit_code)];
    issues.extend(head_lines(&combined, GENERIC_FAILURE_LINES));
    let mut result = empty_suite(false, cap_raw(combined), metadata);
    result.issues = issues;
    result
}

fn empty_suite(passed: bool, raw_output: String, metadata: CheckMetadata) -> TestSuiteResult {
    TestSuiteResult {
        passed,
        total: 0,
        num_passed: 0,
        num_failed: 0,
        num_skipped: 0,
        failed_suites: 0,
        failing_tests: Vec::new(),
        issues: Vec::new(),
        raw_output,
        metadata,
    }
}

fn from_parsed(run: ParsedTestRun, raw_output: String, metadata: CheckMetadata) -> TestSuiteResult {
    let mut issues: Vec<String> = run
        .failing
        .iter()
        .take(MAX_FAILING_TESTS)
        .map(|f| {
            if f.first_line.is_empty() {
                f.name.clone()
            } else {
                format!("{}: {}", f.name, f.first_line)
            }
        })
        .collect();
    let listed = issues.len() as u32;
    if run.failed > listed {
        issues.push(format!("... and {} more failing tests", run.failed - listed));
    }

    TestSuiteResult {
        passed: run.success(),
        total: run.total,
        num_passed: run.passed,
        num_failed: run.failed,
        num_skipped: run.skipped,
        failed_suites: run.failed_suites,
        failing_tests: run.failing_names(),
        issues,
        raw_output,
        metadata,
    }
}

fn cap_raw(s: String) -> String {
    if s.len() > MAX_RAW_OUTPUT_BYTES {
        truncate_chars(&s, MAX_RAW_OUTPUT_BYTES).to_string()
    } else {
        s
    }
}

fn head_lines(s: &str, n: usize) -> Vec<String> {
    s.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .take(n)
        .map(|l| truncate_chars(l, 300).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{exit_ok, ScriptedRunner};
    use crate::test_report::FailingTest;

    #[test]
    fn test_cache_key_scopes_never_collide() {
        let dir = Path::new("/repo");
        let full = cache_key(dir, CheckKind::Tests, TestScope::Full);
        let affected = cache_key(dir, CheckKind::Tests, TestScope::Affected);
        let compile = cache_key(dir, CheckKind::Compile, TestScope::Full);
        assert_eq!(full, "/repo::tests::full");
        assert_ne!(full, affected);
        assert_ne!(full, compile);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_cache_expires_and_evicts() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(300));
        cache.insert("k", 7);
        assert_eq!(cache.get("k"), Some(7));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("k"), Some(7));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty(), "expired entry must be evicted on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache: TtlCache<&str> = TtlCache::new(Duration::from_secs(10));
        cache.insert("a", "x");
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.insert("b", "y");
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_insert_overwrites() {
        let cache: TtlCache<u32> = TtlCache::new(DEFAULT_TTL);
        cache.insert("k", 1);
        cache.insert("k", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn test_check_request_scope() {
        let req = CheckRequest::new("/repo", Duration::from_secs(1)).changed_only(true);
        assert_eq!(req.scope(), TestScope::Affected);
        assert_eq!(
            CheckRequest::new("/repo", Duration::from_secs(1)).scope(),
            TestScope::Full
        );
    }

    #[tokio::test]
    async fn test_key_locks_are_released_after_checks() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .script("tsc", exit_ok(""))
                .script("vitest", exit_ok(r#"{"numTotalTests": 1, "numPassedTests": 1}"#)),
        );
        let cache = LocalCheckCache::new(runner.clone(), CheckCommands::default(), DEFAULT_TTL)
            .unwrap();
        let req = CheckRequest::new("/repo", Duration::from_secs(5));

        let (first, second) = tokio::join!(cache.run_compile_check(&req), cache.run_compile_check(&req));
        assert!(first.passed && second.passed);
        cache.run_test_suite(&req).await;
        cache.run_test_suite(&req.clone().force_refresh(true)).await;

        assert_eq!(runner.call_count("tsc"), 1);
        assert_eq!(runner.call_count("vitest"), 2);
        assert!(cache.inflight.lock().await.is_empty());
    }

    #[test]
    fn test_issues_are_capped_but_failing_names_are_complete() {
        let failing: Vec<FailingTest> = (0..25)
            .map(|i| FailingTest {
                suite: "src/legacy.test.ts".to_string(),
                name: format!("legacy > case {i}"),
                first_line: "AssertionError: boom".to_string(),
            })
            .collect();
        let run = ParsedTestRun {
            total: 30,
            passed: 5,
            failed: 25,
            skipped: 0,
            failed_suites: 1,
            failing,
        };
        let metadata = CheckMetadata {
            command: "npx vitest run --reporter=json".to_string(),
            working_dir: "/repo".to_string(),
            timeout_ms: 1000,
            cache_key: "/repo::tests::full".to_string(),
            cache_hit: false,
        };

        let result = from_parsed(run, String::new(), metadata);

        assert_eq!(result.failing_tests.len(), 25);
        assert_eq!(result.failing_tests[24], "legacy > case 24");
        assert_eq!(result.issues.len(), MAX_FAILING_TESTS + 1);
        assert_eq!(result.issues.last().unwrap(), "... and 5 more failing tests");
    }

    #[test]
    fn test_head_lines_skips_blank() {
        let lines = head_lines("\n\nfirst\n\nsecond\nthird\n", 2);
        assert_eq!(lines, vec!["first", "second"]);
    }
}
