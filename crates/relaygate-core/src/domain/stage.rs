//! Pipeline stage results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A check inside the per-task gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    Compile,
    Tests,
    Architecture,
    Simplicity,
    ErrorAnalysis,
    Completeness,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::Compile,
        StageName::Tests,
        StageName::Architecture,
        StageName::Simplicity,
        StageName::ErrorAnalysis,
        StageName::Completeness,
    ];

    pub const REVIEWS: [StageName; 4] = [
        StageName::Architecture,
        StageName::Simplicity,
        StageName::ErrorAnalysis,
        StageName::Completeness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Compile => "compile",
            StageName::Tests => "tests",
            StageName::Architecture => "architecture",
            StageName::Simplicity => "simplicity",
            StageName::ErrorAnalysis => "error-analysis",
            StageName::Completeness => "completeness",
        }
    }

    /// Binary gates: a failure blocks regardless of score.
    pub fn is_hard(&self) -> bool {
        matches!(self, StageName::Compile | StageName::Tests)
    }

    pub fn is_review(&self) -> bool {
        !self.is_hard()
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test counts attached to the test stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    /// 0-100.
    pub score: u8,
    pub passed: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    /// False for placeholders standing in for stages that never ran.
    pub executed: bool,
    /// Serialized as a nested `tests` object, never merged into the stage keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestCounts>,
}

impl StageResult {
    /// Default passing placeholder for a stage that was not executed.
    pub fn placeholder() -> Self {
        Self {
            score: 100,
            passed: true,
            issues: Vec::new(),
            suggestions: Vec::new(),
            executed: false,
            tests: None,
        }
    }

    pub fn pass(score: u8) -> Self {
        Self {
            score: score.min(100),
            passed: true,
            issues: Vec::new(),
            suggestions: Vec::new(),
            executed: true,
            tests: None,
        }
    }

    pub fn fail(score: u8, issues: Vec<String>) -> Self {
        Self {
            score: score.min(100),
            passed: false,
            issues,
            suggestions: Vec::new(),
            executed: true,
            tests: None,
        }
    }

    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_tests(mut self, counts: TestCounts) -> Self {
        self.tests = Some(counts);
        self
    }
}

/// Aggregate outcome of one pipeline cycle for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub task_id: String,
    pub stages: BTreeMap<StageName, StageResult>,
    /// Aggregate 0-100 score from the scoring policy.
    pub score: u8,
    pub passed: bool,
    /// 1-based count of pipeline runs for this task.
    pub cycle: u32,
    pub needs_escalation: bool,
    /// sha256 hex of the evaluated diff.
    pub diff_digest: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn stage(&self, name: StageName) -> Option<&StageResult> {
        self.stages.get(&name)
    }

    /// Stages whose result failed, in stage order.
    pub fn failing_stages(&self) -> Vec<StageName> {
        self.stages
            .iter()
            .filter(|(_, r)| !r.passed)
            .map(|(name, _)| *name)
            .collect()
    }

    /// All issues prefixed with their stage name.
    pub fn issue_digest(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|(name, r)| r.issues.iter().map(move |i| format!("[{name}] {i}")))
            .collect()
    }
}
