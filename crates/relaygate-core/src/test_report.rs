//! Test runner report parsing.
//!
//! The structured path understands the Jest/Vitest `--reporter=json` schema.
//! The JSON object may be surrounded by other runner output. When no report
//! can be found, [`parse_text_summary`] scrapes the human summary line and
//! [`has_failure_marker`] is the last resort.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Upper bound on failing tests spelled out as issues.
pub const MAX_FAILING_TESTS: usize = 20;

/// Upper bound on failing test names carried in a result.
pub const MAX_FAILING_TEST_NAMES: usize = 1000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsonTestReport {
    num_total_tests: Option<u32>,
    num_passed_tests: u32,
    num_failed_tests: u32,
    num_pending_tests: u32,
    num_todo_tests: u32,
    num_total_test_suites: u32,
    num_passed_test_suites: u32,
    num_failed_test_suites: u32,
    num_pending_test_suites: u32,
    success: Option<bool>,
    test_results: Vec<JsonSuiteResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsonSuiteResult {
    name: String,
    status: String,
    message: String,
    assertion_results: Vec<JsonAssertionResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsonAssertionResult {
    full_name: String,
    title: String,
    status: String,
    failure_messages: Vec<String>,
}

impl JsonAssertionResult {
    fn name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.title
        } else {
            &self.full_name
        }
    }
}

/// A failing test and the first line of its failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailingTest {
    pub suite: String,
    pub name: String,
    pub first_line: String,
}

/// Counts and failures extracted from one test run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTestRun {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub failed_suites: u32,
    /// Failing tests in report order, bounded to [`MAX_FAILING_TEST_NAMES`].
    pub failing: Vec<FailingTest>,
}

impl ParsedTestRun {
    pub fn success(&self) -> bool {
        self.failed == 0 && self.failed_suites == 0
    }

    pub fn failing_names(&self) -> Vec<String> {
        self.failing.iter().map(|f| f.name.clone()).collect()
    }
}

/// Locate and parse a JSON test report inside arbitrary runner output.
pub fn parse_json_report(output: &str) -> Option<ParsedTestRun> {
    let report = find_report(output)?;
    Some(report_to_run(&report))
}

fn find_report(output: &str) -> Option<JsonTestReport> {
    let end = output.rfind('}')?;
    let mut offset = 0;
    // Try every line that opens an object, earliest first, up to the last brace.
    for line in output.split_inclusive('\n') {
        let start = offset + (line.len() - line.trim_start().len());
        offset += line.len();
        if start > end || !output[start..].starts_with('{') {
            continue;
        }
        if let Ok(report) = serde_json::from_str::<JsonTestReport>(&output[start..=end]) {
            if report.num_total_tests.is_some() {
                return Some(report);
            }
        }
    }
    None
}

fn report_to_run(report: &JsonTestReport) -> ParsedTestRun {
    let mut failing = Vec::new();
    let mut failed_from_suites = 0u32;

    for suite in &report.test_results {
        for assertion in &suite.assertion_results {
            if assertion.status == "failed" {
                failed_from_suites += 1;
                if failing.len() < MAX_FAILING_TEST_NAMES {
                    failing.push(FailingTest {
                        suite: suite.name.clone(),
                        name: assertion.name().to_string(),
                        first_line: first_line(&assertion.failure_messages.join("\n")),
                    });
                }
            }
        }
        // A suite that failed to load has no assertions but still fails the run.
        if suite.status == "failed"
            && suite.assertion_results.is_empty()
            && failing.len() < MAX_FAILING_TEST_NAMES
        {
            failing.push(FailingTest {
                suite: suite.name.clone(),
                name: suite.name.clone(),
                first_line: first_line(&suite.message),
            });
        }
    }

    let failed = report.num_failed_tests.max(failed_from_suites);
    let total = report.num_total_tests.unwrap_or(0);
    let mut failed_suites = report.num_failed_test_suites;
    if report.success == Some(false) && failed == 0 && failed_suites == 0 {
        failed_suites = 1;
    }

    ParsedTestRun {
        total,
        passed: report.num_passed_tests,
        failed,
        skipped: report.num_pending_tests + report.num_todo_tests,
        failed_suites,
        failing,
    }
}

fn first_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("No message")
        .to_string()
}

fn summary_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*Tests:?\s+(.*)$").expect("valid regex"))
}

fn count_re(label: &'static str) -> Regex {
    Regex::new(&format!(r"(\d+)\s+{label}")).expect("valid regex")
}

fn failing_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:FAIL|×|✗|✕)\s+(.+?)\s*$").expect("valid regex"))
}

/// Scrape the runner's human summary line, e.g. Vitest's
/// `Tests  1 failed | 4 passed (5)` or Jest's `Tests: 1 failed, 4 passed, 5 total`.
pub fn parse_text_summary(output: &str) -> Option<ParsedTestRun> {
    let caps = summary_line_re().captures_iter(output).last()?;
    let line = caps.get(1)?.as_str();

    let count = |label: &'static str| -> Option<u32> {
        count_re(label)
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    };

    let failed = count("failed").unwrap_or(0);
    let passed = count("passed").unwrap_or(0);
    let skipped = count("skipped").unwrap_or(0) + count("todo").unwrap_or(0);
    let total = count("total")
        .or_else(|| {
            Regex::new(r"\((\d+)\)")
                .ok()?
                .captures(line)?
                .get(1)?
                .as_str()
                .parse()
                .ok()
        })
        .unwrap_or(failed + passed + skipped);

    if total == 0 && failed == 0 && passed == 0 {
        return None;
    }

    let failing = failing_line_re()
        .captures_iter(output)
        .filter_map(|c| c.get(1))
        .take(MAX_FAILING_TEST_NAMES)
        .map(|m| FailingTest {
            suite: String::new(),
            name: m.as_str().to_string(),
            first_line: String::new(),
        })
        .collect();

    Some(ParsedTestRun {
        total,
        passed,
        failed,
        skipped,
        failed_suites: 0,
        failing,
    })
}

/// Presence-of-failure heuristic for output nothing else understands.
pub fn has_failure_marker(output: &str) -> bool {
    output.contains("FAIL")
        || output.contains('✗')
        || output.contains('×')
        || output.contains(" failed")
}

/// Suite/test totals plus one line per failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_suites: u32,
    pub passed_suites: u32,
    pub failed_suites: u32,
    pub skipped_suites: u32,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub skipped_tests: u32,
    pub failures: Vec<FailingTest>,
}

impl ReportSummary {
    /// Plain-text rendering used by the CLI.
    pub fn render(&self) -> String {
        let mut out = format!(
            "TOTAL SUITES {} PASS {} FAIL {} SKIPPED {}\n",
            self.total_suites, self.passed_suites, self.failed_suites, self.skipped_suites
        );
        out.push_str(&format!(
            "TOTAL TESTS {} PASS {} FAIL {} SKIPPED {}\n",
            self.total_tests, self.passed_tests, self.failed_tests, self.skipped_tests
        ));
        out.push_str(&format!("FAILURE COUNT {}\n", self.failures.len()));
        if !self.failures.is_empty() {
            out.push_str("\nFAILURES:\n");
            for f in &self.failures {
                out.push_str(&format!("- {}: {}\n", f.name, f.first_line));
            }
        }
        out
    }
}

/// Summarize a complete JSON report, including every failure message.
pub fn summarize_report(json: &str) -> Result<ReportSummary> {
    let json = json.trim_start_matches('\u{feff}');
    let report = find_report(json).ok_or_else(|| {
        GateError::TestReport("no JSON test report found in input".to_string())
    })?;

    let failures = report
        .test_results
        .iter()
        .flat_map(|suite| {
            suite
                .assertion_results
                .iter()
                .filter(|a| a.status == "failed")
                .map(move |a| FailingTest {
                    suite: suite.name.clone(),
                    name: a.name().to_string(),
                    first_line: first_line(&a.failure_messages.join("\n")),
                })
        })
        .collect();

    Ok(ReportSummary {
        total_suites: report.num_total_test_suites,
        passed_suites: report.num_passed_test_suites,
        failed_suites: report.num_failed_test_suites,
        skipped_suites: report.num_pending_test_suites,
        total_tests: report.num_total_tests.unwrap_or(0),
        passed_tests: report.num_passed_tests,
        failed_tests: report.num_failed_tests,
        skipped_tests: report.num_pending_tests + report.num_todo_tests,
        failures,
    })
}
