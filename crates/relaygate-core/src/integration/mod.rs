//! Batch-level integration verification gate.
//!
//! Runs after every task in a batch passed its own pipeline and re-verifies
//! the combined working tree:
//!
//! 1. full compile check and conflict check, concurrently
//! 2. full test suite, only when the compile check passed
//! 3. wiring check (advisory)
//! 4. on failure, best-effort attribution to recent authors
//!
//! Nothing here returns an error; every failing step degrades to a safe
//! default and is logged.

mod breakers;
mod wiring;

pub use breakers::{identify_breakers, implicated_files, MAX_BREAKER_ISSUES};
pub use wiring::{scan_references, verify_wiring, wiring_candidates, NO_NEW_FILES_WARNING};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use crate::cache::{cache_key, CheckRequest, LocalCheckCache};
use crate::config::IntegrationConfig;
use crate::domain::{
    CheckKind, CheckMetadata, ConflictResult, IntegrationCheckResult, TestScope, TestSuiteResult,
    WiringResult,
};
use crate::git;
use crate::obs::{emit_integration_finished, emit_integration_step_degraded};
use crate::process::CommandRunner;

/// Issue of the synthesized test result when compilation failed.
pub const TYPE_CHECK_SKIPPED: &str = "Skipped — type check failed";

/// Warning attached to the wiring result when the directory is not a git work tree.
pub const WIRING_SKIPPED_NOT_GIT: &str = "Wiring check skipped: not a git repository";

pub struct IntegrationVerificationGate {
    working_dir: PathBuf,
    cache: Arc<LocalCheckCache>,
    runner: Arc<dyn CommandRunner>,
    config: IntegrationConfig,
}

impl IntegrationVerificationGate {
    /// Gate over `working_dir`, sharing `cache` and its command runner.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        cache: Arc<LocalCheckCache>,
        config: IntegrationConfig,
    ) -> Self {
        let runner = cache.runner();
        Self {
            working_dir: working_dir.into(),
            cache,
            runner,
            config,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn git_timeout(&self) -> Duration {
        Duration::from_millis(self.config.git_timeout_ms)
    }

    /// Verify the combined working tree.
    pub async fn run_check(&self) -> IntegrationCheckResult {
        let started = Instant::now();

        let compile_req = CheckRequest::new(
            &self.working_dir,
            Duration::from_millis(self.config.compile_timeout_ms),
        )
        .force_refresh(self.config.force_refresh);

        let (type_check, conflicts) = tokio::join!(
            self.cache.run_compile_check(&compile_req),
            self.check_conflicts()
        );

        let test_suite = if type_check.passed {
            let req = CheckRequest::new(
                &self.working_dir,
                Duration::from_millis(self.config.test_timeout_ms),
            )
            .force_refresh(self.config.force_refresh);
            self.cache.run_test_suite(&req).await
        } else {
            TestSuiteResult::skipped(TYPE_CHECK_SKIPPED, self.skipped_test_metadata())
        };

        let wiring = self.check_wiring().await;

        let passed = type_check.passed && test_suite.passed && !conflicts.has_conflicts;
        let broken_by = if passed {
            Vec::new()
        } else {
            identify_breakers(
                self.runner.as_ref(),
                &self.working_dir,
                &type_check.issues,
                self.git_timeout(),
            )
            .await
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        emit_integration_finished(passed, broken_by.len(), duration_ms);

        IntegrationCheckResult {
            passed,
            type_check,
            test_suite,
            conflicts,
            wiring,
            broken_by,
            timestamp: Utc::now(),
            duration_ms,
        }
    }

    async fn check_conflicts(&self) -> ConflictResult {
        match git::conflicted_files(self.runner.as_ref(), &self.working_dir, self.git_timeout())
            .await
        {
            Ok(files) => ConflictResult {
                has_conflicts: !files.is_empty(),
                conflict_files: files,
            },
            Err(e) => {
                emit_integration_step_degraded("conflicts", &e);
                ConflictResult::default()
            }
        }
    }

    async fn check_wiring(&self) -> WiringResult {
        if !git::is_git_repo(self.runner.as_ref(), &self.working_dir, self.git_timeout()).await {
            emit_integration_step_degraded("wiring", &"not a git repository");
            return WiringResult {
                passed: true,
                warnings: vec![WIRING_SKIPPED_NOT_GIT.to_string()],
                ..WiringResult::default()
            };
        }

        let new_files =
            match git::new_files(self.runner.as_ref(), &self.working_dir, self.git_timeout()).await
            {
                Ok(files) => files,
                Err(e) => {
                    emit_integration_step_degraded("wiring", &e);
                    return WiringResult {
                        passed: true,
                        warnings: vec![format!("Wiring check skipped: {e}")],
                        ..WiringResult::default()
                    };
                }
            };
        debug!(count = new_files.len(), "new files for wiring check");

        match verify_wiring(self.working_dir.clone(), new_files, self.config.clone()).await {
            Ok(result) => result,
            Err(e) => {
                emit_integration_step_degraded("wiring", &e);
                WiringResult {
                    passed: true,
                    warnings: vec![format!("Wiring check skipped: {e}")],
                    ..WiringResult::default()
                }
            }
        }
    }

    fn skipped_test_metadata(&self) -> CheckMetadata {
        CheckMetadata {
            command: self.cache.commands().test.join(" "),
            working_dir: self.working_dir.display().to_string(),
            timeout_ms: self.config.test_timeout_ms,
            cache_key: cache_key(&self.working_dir, CheckKind::Tests, TestScope::Full),
            cache_hit: false,
        }
    }
}
