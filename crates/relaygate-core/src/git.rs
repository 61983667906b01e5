//! Git queries used by the integration gate.
//!
//! All calls go through a [`CommandRunner`] so they share the timeout and
//! tooling-failure handling of every other external command.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{GateError, Result};
use crate::process::{CommandRunner, CommandSpec, ProcessOutcome};

/// Run `git <args>` in `repo_dir` and return trimmed stdout.
pub async fn git(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<String> {
    let spec = CommandSpec::new("git", args.iter().copied(), repo_dir, timeout);
    match runner.run(&spec).await {
        ProcessOutcome::Ok(out) => Ok(out.stdout.trim().to_string()),
        ProcessOutcome::CorrectnessFailure(out) => Err(GateError::GitError(format!(
            "git {} failed: {}",
            args.join(" "),
            out.stderr.trim()
        ))),
        ProcessOutcome::ToolingFailure(f) => Err(GateError::GitError(f.message)),
    }
}

fn lines(stdout: &str) -> impl Iterator<Item = String> + '_ {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// Files with unresolved merge conflicts.
pub async fn conflicted_files(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    timeout: Duration,
) -> Result<Vec<String>> {
    let out = git(
        runner,
        repo_dir,
        &["diff", "--name-only", "--diff-filter=U"],
        timeout,
    )
    .await?;
    Ok(lines(&out).collect())
}

/// Files added relative to HEAD plus untracked, non-ignored files.
///
/// Sorted and de-duplicated.
pub async fn new_files(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    timeout: Duration,
) -> Result<Vec<String>> {
    let added = git(
        runner,
        repo_dir,
        &["diff", "--name-only", "--diff-filter=A", "HEAD"],
        timeout,
    )
    .await?;
    let untracked = git(
        runner,
        repo_dir,
        &["ls-files", "--others", "--exclude-standard"],
        timeout,
    )
    .await?;

    let files: BTreeSet<String> = lines(&added).chain(lines(&untracked)).collect();
    Ok(files.into_iter().collect())
}

/// Author name of the last commit touching `file`, if any.
pub async fn last_author(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    file: &str,
    timeout: Duration,
) -> Result<Option<String>> {
    let out = git(
        runner,
        repo_dir,
        &["log", "-1", "--format=%an", "--", file],
        timeout,
    )
    .await?;
    Ok(if out.is_empty() { None } else { Some(out) })
}

/// Check whether a directory is inside a git work tree.
pub async fn is_git_repo(runner: &dyn CommandRunner, dir: &Path, timeout: Duration) -> bool {
    git(runner, dir, &["rev-parse", "--is-inside-work-tree"], timeout)
        .await
        .is_ok()
}
