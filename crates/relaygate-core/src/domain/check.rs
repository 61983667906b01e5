//! Compile and test check results.

use serde::{Deserialize, Serialize};

/// Which expensive check produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Compile,
    Tests,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Compile => "compile",
            CheckKind::Tests => "tests",
        }
    }
}

/// Test selection scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestScope {
    /// Only tests affected by changed files.
    Affected,
    /// The whole suite.
    #[default]
    Full,
}

impl TestScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestScope::Affected => "affected",
            TestScope::Full => "full",
        }
    }
}

/// How a check was invoked. Used to format deterministic diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckMetadata {
    pub command: String,
    pub working_dir: String,
    pub timeout_ms: u64,
    pub cache_key: String,
    pub cache_hit: bool,
}

impl CheckMetadata {
    /// One-line diagnostics string appended to failing stage issues.
    ///
    /// The format is stable so downstream log scrapers can parse it.
    pub fn diagnostics(&self, attempt: u32, max_attempts: u32) -> String {
        format!(
            "Diagnostics: command={} cwd={} attempt={}/{} cacheKey={} cacheHit={}",
            self.command, self.working_dir, attempt, max_attempts, self.cache_key, self.cache_hit
        )
    }
}

/// Outcome of a no-emit compile check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileCheckResult {
    pub passed: bool,
    pub error_count: usize,
    /// Compiler error lines (or synthesized explanations), in output order.
    pub issues: Vec<String>,
    pub raw_output: String,
    pub metadata: CheckMetadata,
}

impl CompileCheckResult {
    /// Copy of this result flagged as served from the cache.
    pub fn as_cache_hit(&self) -> Self {
        let mut hit = self.clone();
        hit.metadata.cache_hit = true;
        hit
    }
}

/// Outcome of one test-suite invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteResult {
    pub passed: bool,
    pub total: u32,
    pub num_passed: u32,
    pub num_failed: u32,
    pub num_skipped: u32,
    pub failed_suites: u32,
    /// Names of failing tests, bounded far above the issue list.
    pub failing_tests: Vec<String>,
    pub issues: Vec<String>,
    pub raw_output: String,
    pub metadata: CheckMetadata,
}

impl TestSuiteResult {
    /// Copy of this result flagged as served from the cache.
    pub fn as_cache_hit(&self) -> Self {
        let mut hit = self.clone();
        hit.metadata.cache_hit = true;
        hit
    }

    /// A failing result for a suite that was deliberately not executed.
    pub fn skipped(reason: &str, metadata: CheckMetadata) -> Self {
        Self {
            passed: false,
            total: 0,
            num_passed: 0,
            num_failed: 0,
            num_skipped: 0,
            failed_suites: 0,
            failing_tests: Vec::new(),
            issues: vec![reason.to_string()],
            raw_output: String::new(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> CheckMetadata {
        CheckMetadata {
            command: "npx vitest run".to_string(),
            working_dir: "/repo".to_string(),
            timeout_ms: 1000,
            cache_key: "/repo::tests::full".to_string(),
            cache_hit: false,
        }
    }

    #[test]
    fn test_skipped_suite_is_failed_with_reason() {
        let result = TestSuiteResult::skipped("Skipped — type check failed", metadata());
        assert!(!result.passed);
        assert_eq!(result.total, 0);
        assert_eq!(result.issues, vec!["Skipped — type check failed"]);
    }

    #[test]
    fn test_as_cache_hit_only_flips_flag() {
        let result = TestSuiteResult::skipped("x", metadata());
        let hit = result.as_cache_hit();
        assert!(hit.metadata.cache_hit);
        assert_eq!(hit.issues, result.issues);
        assert!(!result.metadata.cache_hit);
    }

    #[test]
    fn test_diagnostics_format_is_stable() {
        let mut meta = metadata();
        meta.cache_hit = true;
        assert_eq!(
            meta.diagnostics(1, 2),
            "Diagnostics: command=npx vitest run cwd=/repo attempt=1/2 cacheKey=/repo::tests::full cacheHit=true"
        );
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let json = serde_json::to_value(metadata()).unwrap();
        assert_eq!(json["cacheKey"], "/repo::tests::full");
        assert_eq!(json["cacheHit"], false);
        assert_eq!(json["workingDir"], "/repo");
    }
}
