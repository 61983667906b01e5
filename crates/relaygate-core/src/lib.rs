//! Relaygate Core Library
//!
//! Gates machine-authored code changes: the per-task quality gate pipeline,
//! the batch-level integration verification gate, and the local check cache
//! both share.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fakes;
pub mod git;
pub mod integration;
pub mod obs;
pub mod paths;
pub mod pipeline;
pub mod process;
pub mod review;
pub mod scoring;
pub mod telemetry;
pub mod test_report;

pub use cache::{cache_key, CacheEntry, CheckRequest, LocalCheckCache, TtlCache, DEFAULT_TTL};

pub use config::{
    default_config_path, BaselineConfig, CacheConfig, CheckCommands, GateConfig,
    IntegrationConfig, ReviewConfig, StageToggles, StageWeights, TestStageConfig,
    CONFIG_FILE_NAME,
};

pub use domain::{
    CheckKind, CheckMetadata, CompileCheckResult, ConflictResult, IntegrationCheckResult,
    PipelineResult, StageName, StageResult, TaskContext, TaskType, TestCounts, TestScope,
    TestSuiteResult, WiringResult,
};

pub use error::{GateError, Result, ReviewError};

pub use integration::{IntegrationVerificationGate, TYPE_CHECK_SKIPPED};

pub use pipeline::{
    classify_diff, enforce_test_first, escalation_summary, run_test_execution, QualityGatePipeline,
    TddPhase, TestExecution, MANUAL_REVIEW_REQUIRED,
};

pub use process::{
    CommandOutput, CommandRunner, CommandSpec, ProcessOutcome, TokioCommandRunner,
    ToolingFailure, ToolingFailureKind,
};

pub use review::{CommandProvider, ProviderFamily, ProviderRegistry, ReviewProvider};

pub use scoring::{AggregateScore, ScoringPolicy};

pub use test_report::{summarize_report, ReportSummary};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
