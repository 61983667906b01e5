//! Integration gate tests against real git repositories.
//!
//! The compiler and test runner are scripted; git commands fall through to the
//! real process runner.

use std::path::Path;
use std::process::Command as StdCommand;
use std::sync::Arc;
use std::time::Duration;

use relaygate_core::fakes::{exit_fail, exit_ok, ScriptedRunner};
use relaygate_core::integration::{NO_NEW_FILES_WARNING, WIRING_SKIPPED_NOT_GIT};
use relaygate_core::{
    CheckCommands, IntegrationConfig, IntegrationVerificationGate, LocalCheckCache,
    TokioCommandRunner, TYPE_CHECK_SKIPPED,
};

const PASSING_REPORT: &str =
    r#"{"numTotalTests": 4, "numPassedTests": 4, "numFailedTests": 0, "testResults": []}"#;

fn run_git(repo_dir: &Path, args: &[&str]) {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn write(repo_dir: &Path, rel: &str, contents: &str) {
    let path = repo_dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn commit_as(repo_dir: &Path, author: &str, message: &str) {
    run_git(repo_dir, &["add", "-A"]);
    run_git(
        repo_dir,
        &[
            "-c",
            &format!("user.name={author}"),
            "-c",
            "user.email=dev@example.com",
            "commit",
            "-m",
            message,
        ],
    );
}

fn make_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    write(dir.path(), "src/index.ts", "export {};\n");
    commit_as(dir.path(), "test-user", "initial");
    dir
}

fn gate(repo: &Path, runner: ScriptedRunner) -> (IntegrationVerificationGate, Arc<ScriptedRunner>) {
    let runner = Arc::new(runner.with_fallback(Arc::new(TokioCommandRunner::new())));
    let cache = Arc::new(
        LocalCheckCache::new(runner.clone(), CheckCommands::default(), Duration::from_secs(300))
            .unwrap(),
    );
    let config = IntegrationConfig {
        git_timeout_ms: 30_000,
        ..IntegrationConfig::default()
    };
    (IntegrationVerificationGate::new(repo, cache, config), runner)
}

fn green() -> ScriptedRunner {
    ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script("vitest", exit_ok(PASSING_REPORT))
}

#[tokio::test]
async fn clean_tree_without_new_files_passes_with_warning() {
    let repo = make_git_repo();
    let (gate, _) = gate(repo.path(), green());

    let result = gate.run_check().await;

    assert!(result.passed);
    assert!(result.type_check.passed);
    assert!(result.test_suite.passed);
    assert_eq!(result.test_suite.total, 4);
    assert!(!result.conflicts.has_conflicts);
    assert!(result.wiring.passed);
    assert_eq!(result.wiring.warnings, vec![NO_NEW_FILES_WARNING]);
    assert!(result.broken_by.is_empty());
}

#[tokio::test]
async fn failed_type_check_skips_tests() {
    let repo = make_git_repo();
    let runner = ScriptedRunner::new().script(
        "tsc",
        exit_fail(2, "src/index.ts(1,1): error TS1005: ';' expected.\n"),
    );
    let (gate, runner) = gate(repo.path(), runner);

    let result = gate.run_check().await;

    assert!(!result.passed);
    assert!(!result.type_check.passed);
    assert!(!result.test_suite.passed);
    assert_eq!(result.test_suite.total, 0);
    assert_eq!(result.test_suite.issues, vec![TYPE_CHECK_SKIPPED]);
    assert!(result.test_suite.metadata.cache_key.ends_with("::tests::full"));
    assert_eq!(runner.call_count("vitest"), 0);
}

#[tokio::test]
async fn failing_tests_fail_the_gate() {
    let repo = make_git_repo();
    let report = r#"{"numTotalTests": 2, "numPassedTests": 1, "numFailedTests": 1,
        "testResults": [{"name": "src/a.test.ts", "assertionResults": [
            {"fullName": "a > works", "status": "failed", "failureMessages": ["expected 1"]}
        ]}]}"#;
    let runner = ScriptedRunner::new()
        .script("tsc", exit_ok(""))
        .script("vitest", exit_fail(1, report));
    let (gate, runner) = gate(repo.path(), runner);

    let result = gate.run_check().await;

    assert!(!result.passed);
    assert!(result.type_check.passed);
    assert_eq!(result.test_suite.failing_tests, vec!["a > works"]);

    let test_call = runner
        .calls()
        .into_iter()
        .find(|c| c.display().contains("vitest"))
        .unwrap();
    assert!(!test_call.args.contains(&"--changed".to_string()));
}

#[tokio::test]
async fn unwired_new_file_is_reported_without_failing() {
    let repo = make_git_repo();
    write(repo.path(), "src/orphan.ts", "export const orphan = 1;\n");
    write(repo.path(), "src/wired.ts", "export const wired = 2;\n");
    write(repo.path(), "src/wired.test.ts", "import { wired } from './wired';\n");
    write(
        repo.path(),
        "src/index.ts",
        "export { wired } from './wired';\n",
    );
    let (gate, _) = gate(repo.path(), green());

    let result = gate.run_check().await;

    assert!(result.passed);
    assert!(!result.wiring.passed);
    assert_eq!(result.wiring.wired_files, vec!["src/wired.ts"]);
    assert_eq!(result.wiring.unwired_files, vec!["src/orphan.ts"]);
    assert_eq!(
        result.wiring.warnings,
        vec!["src/orphan.ts is not imported by any other file"]
    );
}

#[tokio::test]
async fn compile_failure_is_attributed_to_last_author() {
    let repo = make_git_repo();
    write(repo.path(), "src/login.ts", "export const login = (: number) => 1;\n");
    commit_as(repo.path(), "alice", "add login");
    write(repo.path(), "src/cart.ts", "export const cart = [;\n");
    commit_as(repo.path(), "bob", "add cart");

    let tsc_output = "src/login.ts(1,22): error TS1138: Parameter declaration expected.\n\
                      src/cart.ts(1,21): error TS1109: Expression expected.\n\
                      src/login.ts(1,30): error TS1005: ';' expected.\n";
    let runner = ScriptedRunner::new().script("tsc", exit_fail(2, tsc_output));
    let (gate, _) = gate(repo.path(), runner);

    let result = gate.run_check().await;

    assert!(!result.passed);
    assert_eq!(result.broken_by, vec!["alice", "bob"]);
}

#[tokio::test]
async fn outside_git_degrades_conflicts_and_wiring() {
    let dir = tempfile::tempdir().unwrap();
    let (gate, _) = gate(dir.path(), green());

    let result = gate.run_check().await;

    assert!(result.passed);
    assert!(!result.conflicts.has_conflicts);
    assert!(result.wiring.passed);
    assert_eq!(result.wiring.warnings, vec![WIRING_SKIPPED_NOT_GIT]);
    assert!(result.wiring.wired_files.is_empty());
}

#[tokio::test]
async fn unresolved_merge_conflict_fails_the_gate() {
    let repo = make_git_repo();
    run_git(repo.path(), &["checkout", "-b", "feature"]);
    write(repo.path(), "src/index.ts", "export const mode = 'feature';\n");
    commit_as(repo.path(), "bob", "feature mode");
    run_git(repo.path(), &["checkout", "-"]);
    write(repo.path(), "src/index.ts", "export const mode = 'main';\n");
    commit_as(repo.path(), "alice", "main mode");

    let merge = StdCommand::new("git")
        .args(["merge", "feature"])
        .current_dir(repo.path())
        .output()
        .unwrap();
    assert!(!merge.status.success(), "merge should stop on the conflict");

    let (gate, _) = gate(repo.path(), green());
    let result = gate.run_check().await;

    assert!(!result.passed);
    assert!(result.conflicts.has_conflicts);
    assert_eq!(result.conflicts.conflict_files, vec!["src/index.ts"]);
    assert!(result.type_check.passed);
}
