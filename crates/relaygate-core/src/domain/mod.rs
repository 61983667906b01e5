//! Shared data contracts for the quality gate pipeline and the integration gate.
//!
//! - `check`: compile/test check results produced by the local check cache
//! - `stage`: per-stage and aggregate pipeline results
//! - `task`: the task context a pipeline run is evaluated against
//! - `integration`: batch-level integration verification results
//!
//! All result types are created fresh per invocation and never mutated after
//! they are returned.

pub mod check;
pub mod integration;
pub mod stage;
pub mod task;

pub use check::{CheckKind, CheckMetadata, CompileCheckResult, TestScope, TestSuiteResult};
pub use integration::{ConflictResult, IntegrationCheckResult, WiringResult};
pub use stage::{PipelineResult, StageName, StageResult, TestCounts};
pub use task::{TaskContext, TaskType};
