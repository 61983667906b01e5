//! Best-effort attribution of an integration failure to authors.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::git;
use crate::obs::emit_integration_step_degraded;
use crate::process::CommandRunner;

/// Compile issues inspected for file paths.
pub const MAX_BREAKER_ISSUES: usize = 10;

fn source_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\w@./-]*[\w-]\.(?:tsx|ts|jsx|js|mjs|cjs|vue|svelte|py|go|rs)\b")
            .expect("valid regex")
    })
}

/// File paths mentioned in the first issues, de-duplicated in order.
pub fn implicated_files(issues: &[String]) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for issue in issues.iter().take(MAX_BREAKER_ISSUES) {
        for m in source_path_re().find_iter(issue) {
            let path = m.as_str().trim_start_matches("./").to_string();
            if !files.contains(&path) {
                files.push(path);
            }
        }
    }
    files
}

/// Most recent author of each implicated file.
///
/// Lookup failures are logged and skipped; the result may be empty.
pub async fn identify_breakers(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    issues: &[String],
    timeout: Duration,
) -> Vec<String> {
    let mut authors: Vec<String> = Vec::new();
    for file in implicated_files(issues) {
        match git::last_author(runner, repo_dir, &file, timeout).await {
            Ok(Some(author)) => {
                if !authors.contains(&author) {
                    authors.push(author);
                }
            }
            Ok(None) => {}
            Err(e) => emit_integration_step_degraded("identify_breakers", &e),
        }
    }
    authors
}
