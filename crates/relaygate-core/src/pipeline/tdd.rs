//! Test-first enforcement for feature tasks.
//!
//! The diff is classified by which kinds of files it touches:
//!
//! | test files | implementation files | phase          |
//! |------------|----------------------|----------------|
//! | yes        | no                   | `TestWriting`  |
//! | yes        | yes                  | `Implementing` |
//! | no         | yes                  | `Review`       |
//!
//! An implementation-only diff fails: code arrived without tests. A
//! test-only diff must contain at least one recognizable assertion.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{StageResult, TaskContext};
use crate::paths::{has_code_extension, is_test_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TddPhase {
    TestWriting,
    Implementing,
    Review,
}

/// Files touched by a unified diff, with their added lines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiffFiles {
    pub files: BTreeMap<String, Vec<String>>,
}

impl DiffFiles {
    pub fn parse(diff: &str) -> Self {
        let mut files: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for line in diff.lines() {
            if let Some(rest) = line.strip_prefix("diff --git ") {
                current = rest
                    .split_whitespace()
                    .last()
                    .map(|p| p.strip_prefix("b/").unwrap_or(p).to_string());
                if let Some(path) = &current {
                    files.entry(path.clone()).or_default();
                }
            } else if let Some(rest) = line.strip_prefix("+++ ") {
                let path = rest.trim();
                if path == "/dev/null" {
                    continue;
                }
                let path = path.strip_prefix("b/").unwrap_or(path).to_string();
                files.entry(path.clone()).or_default();
                current = Some(path);
            } else if line.starts_with("--- ") {
                continue;
            } else if let Some(added) = line.strip_prefix('+') {
                if let Some(path) = &current {
                    files.entry(path.clone()).or_default().push(added.to_string());
                }
            }
        }

        Self { files }
    }

    pub fn test_files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str).filter(|p| is_test_path(p))
    }

    pub fn implementation_files(&self) -> impl Iterator<Item = &str> {
        self.files
            .keys()
            .map(String::as_str)
            .filter(|p| !is_test_path(p) && has_code_extension(p))
    }

    /// Phase implied by the touched files, `None` when no code is touched.
    pub fn phase(&self) -> Option<TddPhase> {
        let has_tests = self.test_files().next().is_some();
        let has_impl = self.implementation_files().next().is_some();
        match (has_tests, has_impl) {
            (true, false) => Some(TddPhase::TestWriting),
            (true, true) => Some(TddPhase::Implementing),
            (false, true) => Some(TddPhase::Review),
            (false, false) => None,
        }
    }

    fn tests_have_assertions(&self) -> bool {
        self.files
            .iter()
            .filter(|(path, _)| is_test_path(path))
            .flat_map(|(_, lines)| lines.iter())
            .any(|l| assertion_re().is_match(l))
    }
}

fn assertion_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:expect|assert\w*|should)\s*!?\s*[(.]|^\s*assert\s")
            .expect("valid regex")
    })
}

/// Classify a diff into its test-first phase.
pub fn classify_diff(diff: &str) -> Option<TddPhase> {
    DiffFiles::parse(diff).phase()
}

/// Check a feature task's diff against test-first discipline.
///
/// Non-feature tasks always pass.
pub fn enforce_test_first(diff: &str, task: &TaskContext) -> StageResult {
    if !task.is_feature() {
        return StageResult::pass(100);
    }

    let files = DiffFiles::parse(diff);
    match files.phase() {
        Some(TddPhase::Review) => {
            let touched: Vec<&str> = files.implementation_files().take(5).collect();
            StageResult::fail(
                0,
                vec![format!(
                    "Implementation changed without test files ({})",
                    touched.join(", ")
                )],
            )
            .with_suggestion("Add or update tests covering the new behavior before implementing it")
        }
        Some(TddPhase::TestWriting) if !files.tests_have_assertions() => StageResult::fail(
            30,
            vec!["Test files contain no recognizable assertions".to_string()],
        )
        .with_suggestion("Tests must assert on behavior (expect/assert), not only set up fixtures"),
        _ => StageResult::pass(100),
    }
}
