//! Relaygate CLI
//!
//! The `relaygate` command runs the gates from a shell or a CI job.
//!
//! ## Commands
//!
//! - `check`: verify the combined working tree (integration gate)
//! - `pipeline`: run the per-task quality gate on a diff
//! - `summarize`: summarize a JSON test report

mod scoring;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use relaygate_core::telemetry::init_tracing;
use relaygate_core::{
    default_config_path, summarize_report, CommandProvider, GateConfig, IntegrationCheckResult,
    IntegrationVerificationGate, LocalCheckCache, PipelineResult, ProviderRegistry,
    QualityGatePipeline, StageName, TaskContext, TaskType, TokioCommandRunner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use crate::scoring::WeightedScorer;

#[derive(Parser)]
#[command(name = "relaygate")]
#[command(version = relaygate_core::VERSION)]
#[command(about = "Quality and integration gates for machine-authored changes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Gate configuration file (default: <dir>/relaygate.toml)
    #[arg(long, global = true, env = "RELAYGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the integration verification gate over a working tree
    Check {
        /// Working tree to verify
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Result format on stdout
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Run the quality gate pipeline on one task's diff
    Pipeline {
        /// Unified diff produced by the task
        #[arg(long)]
        diff: PathBuf,

        #[arg(long)]
        task_id: String,

        /// feature, bugfix, refactor, test, docs or chore
        #[arg(long, default_value = "feature")]
        task_type: TaskType,

        #[arg(long)]
        description: String,

        /// Working tree the diff was produced in
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Ask the escalation reviewer for guidance when the run fails
        #[arg(long)]
        escalate: bool,

        /// Result format on stdout
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Summarize a JSON test report
    Summarize {
        /// Report produced by `--reporter=json`
        report: PathBuf,

        /// Result format on stdout
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Check { dir, output } => {
            let config = load_config(cli.config.as_deref(), &dir)?;
            cmd_check(&dir, &config, output).await
        }
        Commands::Pipeline {
            diff,
            task_id,
            task_type,
            description,
            dir,
            escalate,
            output,
        } => {
            let config = load_config(cli.config.as_deref(), &dir)?;
            let task = TaskContext::new(task_id, description, task_type, &dir);
            cmd_pipeline(&diff, &task, &config, escalate, output).await
        }
        Commands::Summarize { report, output } => cmd_summarize(&report, output),
    }
}

fn load_config(explicit: Option<&Path>, dir: &Path) -> Result<GateConfig> {
    match explicit {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {:?}", path))?;
            GateConfig::from_toml_str(&content)
                .with_context(|| format!("Invalid config in {:?}", path))
        }
        None => {
            let path = default_config_path(dir);
            GateConfig::load_or_default(&path)
                .with_context(|| format!("Invalid config in {:?}", path))
        }
    }
}

/// Run the integration gate; fails the process when the gate does not pass.
async fn cmd_check(dir: &Path, config: &GateConfig, output: OutputFormat) -> Result<()> {
    let runner = Arc::new(TokioCommandRunner::new());
    let cache = Arc::new(
        LocalCheckCache::from_config(runner, config).context("Failed to build check cache")?,
    );
    let gate = IntegrationVerificationGate::new(dir, cache, config.integration.clone());

    info!(dir = %dir.display(), "running integration check");
    let result = gate.run_check().await;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print!("{}", render_integration(&result)),
    }

    if result.passed {
        Ok(())
    } else {
        anyhow::bail!("Integration check failed")
    }
}

/// Run the quality pipeline on a diff file.
async fn cmd_pipeline(
    diff_path: &Path,
    task: &TaskContext,
    config: &GateConfig,
    escalate: bool,
    output: OutputFormat,
) -> Result<()> {
    let diff = std::fs::read_to_string(diff_path)
        .with_context(|| format!("Failed to read diff {:?}", diff_path))?;

    let runner = Arc::new(TokioCommandRunner::new());
    let cache = Arc::new(
        LocalCheckCache::from_config(runner.clone(), config)
            .context("Failed to build check cache")?,
    );
    let reviewer = CommandProvider::new(
        runner,
        config.review.command.clone(),
        &task.working_dir,
        config.review_timeout(),
    );
    let registry = ProviderRegistry::new().with_fallback(Arc::new(reviewer));
    let pipeline = QualityGatePipeline::new(cache, registry, Arc::new(WeightedScorer));

    info!(task_id = %task.task_id, task_type = %task.task_type, "running quality pipeline");
    let result = pipeline.run_pipeline(&diff, task, config).await;

    let guidance = if escalate && !result.passed {
        Some(pipeline.escalate(&result, &diff, task, config).await)
    } else {
        None
    };

    match output {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(&result)?;
            if let (Some(text), Some(obj)) = (&guidance, value.as_object_mut()) {
                obj.insert("escalation".to_string(), serde_json::Value::String(text.clone()));
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            print!("{}", render_pipeline(&result));
            if let Some(text) = &guidance {
                println!("\nEscalation guidance:\n{}", text);
            }
        }
    }

    if result.passed {
        Ok(())
    } else {
        anyhow::bail!("Quality gate failed for task {}", task.task_id)
    }
}

fn cmd_summarize(report: &Path, output: OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(report)
        .with_context(|| format!("Failed to read report {:?}", report))?;
    let summary = summarize_report(&content)
        .with_context(|| format!("Failed to summarize {:?}", report))?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print!("{}", summary.render()),
    }
    Ok(())
}

fn mark(passed: bool) -> &'static str {
    if passed {
        "✓"
    } else {
        "✗"
    }
}

fn render_integration(result: &IntegrationCheckResult) -> String {
    let mut out = format!(
        "Integration: {} ({}ms)\n",
        if result.passed { "✓ PASSED" } else { "✗ FAILED" },
        result.duration_ms
    );

    out.push_str(&format!(
        "  {} type check ({} error(s))\n",
        mark(result.type_check.passed),
        result.type_check.error_count
    ));
    for issue in &result.type_check.issues {
        out.push_str(&format!("      {}\n", issue));
    }

    let suite = &result.test_suite;
    out.push_str(&format!(
        "  {} tests ({} passed, {} failed, {} skipped of {})\n",
        mark(suite.passed),
        suite.num_passed,
        suite.num_failed,
        suite.num_skipped,
        suite.total
    ));
    for issue in &suite.issues {
        out.push_str(&format!("      {}\n", issue));
    }

    out.push_str(&format!(
        "  {} conflicts\n",
        mark(!result.conflicts.has_conflicts)
    ));
    for file in &result.conflicts.conflict_files {
        out.push_str(&format!("      {}\n", file));
    }

    out.push_str(&format!(
        "  {} wiring ({} wired, {} unwired)\n",
        mark(result.wiring.passed),
        result.wiring.wired_files.len(),
        result.wiring.unwired_files.len()
    ));
    for warning in &result.wiring.warnings {
        out.push_str(&format!("      {}\n", warning));
    }

    if !result.broken_by.is_empty() {
        out.push_str(&format!("Likely broken by: {}\n", result.broken_by.join(", ")));
    }
    out
}

fn render_pipeline(result: &PipelineResult) -> String {
    let mut out = format!(
        "Task {} (cycle {}): {} score {}\n",
        result.task_id,
        result.cycle,
        if result.passed { "✓ PASSED" } else { "✗ FAILED" },
        result.score
    );
    out.push_str(&format!("Run ID: {}\n", result.run_id));

    for name in StageName::ALL {
        let Some(stage) = result.stage(name) else {
            continue;
        };
        if !stage.executed {
            out.push_str(&format!("  - {} (not run)\n", name));
            continue;
        }
        out.push_str(&format!("  {} {} {}\n", mark(stage.passed), name, stage.score));
        for issue in &stage.issues {
            out.push_str(&format!("      {}\n", issue));
        }
        for suggestion in &stage.suggestions {
            out.push_str(&format!("      hint: {}\n", suggestion));
        }
    }

    if result.needs_escalation {
        out.push_str("Escalation recommended: review cycle limit reached\n");
    }
    out
}
