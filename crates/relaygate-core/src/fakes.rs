//! Scripted fakes for the command, review and scoring seams (testing only)
//!
//! Provides `ScriptedRunner`, `ScriptedProvider` and `FixedScorer` so the
//! pipeline and the integration gate can be driven without a real toolchain
//! or language model.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{StageToggles, StageWeights};
use crate::domain::{StageName, StageResult};
use crate::error::ReviewError;
use crate::process::{
    CommandOutput, CommandRunner, CommandSpec, ProcessOutcome, ToolingFailure, ToolingFailureKind,
};
use crate::review::ReviewProvider;
use crate::scoring::{hard_stages_passed, AggregateScore, ScoringPolicy};

// ---------------------------------------------------------------------------
// Outcome helpers
// ---------------------------------------------------------------------------

/// Exit 0 with the given stdout.
pub fn exit_ok(stdout: &str) -> ProcessOutcome {
    ProcessOutcome::Ok(CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
        duration_ms: 1,
    })
}

/// Non-zero exit with the given stdout.
pub fn exit_fail(code: i32, stdout: &str) -> ProcessOutcome {
    ProcessOutcome::CorrectnessFailure(CommandOutput {
        exit_code: code,
        stdout: stdout.to_string(),
        stderr: String::new(),
        duration_ms: 1,
    })
}

pub fn timed_out(message: &str) -> ProcessOutcome {
    ProcessOutcome::ToolingFailure(ToolingFailure {
        kind: ToolingFailureKind::TimedOut,
        message: message.to_string(),
    })
}

pub fn spawn_failed(message: &str) -> ProcessOutcome {
    ProcessOutcome::ToolingFailure(ToolingFailure {
        kind: ToolingFailureKind::SpawnFailed,
        message: message.to_string(),
    })
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

struct Script {
    needle: String,
    outcomes: VecDeque<ProcessOutcome>,
}

/// Command runner answering from scripted outcomes.
///
/// A command matches the first script whose needle appears in its display
/// string. Outcomes are consumed in order; the last one repeats. Unmatched
/// commands go to the fallback runner, or fail to spawn when there is none.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<Vec<Script>>,
    calls: Mutex<Vec<CommandSpec>>,
    delay: Option<Duration>,
    fallback: Option<Arc<dyn CommandRunner>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `outcome` for commands containing `needle`.
    pub fn script(self, needle: &str, outcome: ProcessOutcome) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.iter_mut().find(|s| s.needle == needle) {
                Some(script) => script.outcomes.push_back(outcome),
                None => scripts.push(Script {
                    needle: needle.to_string(),
                    outcomes: VecDeque::from([outcome]),
                }),
            }
        }
        self
    }

    /// Sleep before answering each scripted command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_fallback(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.fallback = Some(runner);
        self
    }

    /// Every command received, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of received commands containing `needle`.
    pub fn call_count(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.display().contains(needle))
            .count()
    }

    fn next_outcome(&self, display: &str) -> Option<ProcessOutcome> {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.iter_mut().find(|s| display.contains(&s.needle))?;
        if script.outcomes.len() > 1 {
            script.outcomes.pop_front()
        } else {
            script.outcomes.front().cloned()
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> ProcessOutcome {
        let display = spec.display();
        let scripted = self.next_outcome(&display);
        if scripted.is_some() || self.fallback.is_none() {
            self.calls.lock().unwrap().push(spec.clone());
        }

        match (scripted, &self.fallback) {
            (Some(outcome), _) => {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                outcome
            }
            (None, Some(fallback)) => fallback.run(spec).await,
            (None, None) => spawn_failed(&format!("no script for '{display}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// What a scripted reviewer does with a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Error(String),
    /// Never answers; exercises the review timeout.
    Hang,
}

/// Review provider answering by system prompt content.
#[derive(Debug)]
pub struct ScriptedProvider {
    rules: Mutex<Vec<(String, Reply)>>,
    default: Reply,
    delay: Option<Duration>,
    calls: AtomicUsize,
    models: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Every request gets `default` unless a rule matches.
    pub fn new(default: Reply) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default,
            delay: None,
            calls: AtomicUsize::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    /// Reply with JSON verdict `{score, issues: [], suggestions: []}` by default.
    pub fn scoring(score: u8) -> Self {
        Self::new(Reply::Text(format!(
            r#"{{"score": {score}, "issues": [], "suggestions": []}}"#
        )))
    }

    /// Use `reply` when the system prompt contains `needle`.
    pub fn when(self, needle: &str, reply: Reply) -> Self {
        self.rules.lock().unwrap().push((needle.to_string(), reply));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Models requested, in call order.
    pub fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewProvider for ScriptedProvider {
    async fn send(
        &self,
        system_prompt: &str,
        _user_message: &str,
        model: &str,
    ) -> std::result::Result<String, ReviewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().unwrap().push(model.to_string());

        let reply = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| system_prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Error(msg) => Err(ReviewError::Provider(msg)),
            Reply::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// FixedScorer
// ---------------------------------------------------------------------------

/// Scoring policy returning a fixed score.
///
/// Still honours the hard-stage rule: a failed enabled compile or test stage
/// fails the run regardless of score.
#[derive(Debug, Clone, Copy)]
pub struct FixedScorer {
    pub score: u8,
}

impl FixedScorer {
    pub fn new(score: u8) -> Self {
        Self { score }
    }
}

impl ScoringPolicy for FixedScorer {
    fn score(
        &self,
        stages: &BTreeMap<StageName, StageResult>,
        toggles: &StageToggles,
        _weights: &StageWeights,
        pass_score: u8,
    ) -> AggregateScore {
        AggregateScore {
            score: self.score,
            passed: self.score >= pass_score && hard_stages_passed(stages, toggles),
        }
    }
}
