//! Batch-level integration verification results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::check::{CompileCheckResult, TestSuiteResult};

/// Unresolved merge conflicts in the working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResult {
    pub has_conflicts: bool,
    pub conflict_files: Vec<String>,
}

/// Whether newly added source files are referenced anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiringResult {
    pub passed: bool,
    pub wired_files: Vec<String>,
    pub unwired_files: Vec<String>,
    pub warnings: Vec<String>,
}

/// Outcome of one integration gate run over the whole working tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationCheckResult {
    pub passed: bool,
    pub type_check: CompileCheckResult,
    /// Only a real run when `type_check.passed`.
    pub test_suite: TestSuiteResult,
    pub conflicts: ConflictResult,
    /// Advisory; does not affect `passed`.
    pub wiring: WiringResult,
    /// Probable authors of the breakage.
    pub broken_by: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}
