use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::ReviewProvider;
use crate::error::ReviewError;
use crate::process::{truncate_chars, CommandRunner, CommandSpec, ProcessOutcome, ToolingFailureKind};

/// Placeholder in the argv replaced with the requested model.
const MODEL_PLACEHOLDER: &str = "{model}";

/// Review provider backed by an external command.
///
/// The system prompt and user message are written to the command's stdin,
/// separated by a blank line; stdout is the response.
pub struct CommandProvider {
    runner: Arc<dyn CommandRunner>,
    argv: Vec<String>,
    cwd: PathBuf,
    timeout: Duration,
}

impl CommandProvider {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        argv: Vec<String>,
        cwd: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            argv,
            cwd: cwd.into(),
            timeout,
        }
    }

    fn spec_for(&self, model: &str, input: String) -> CommandSpec {
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|a| a.replace(MODEL_PLACEHOLDER, model))
            .collect();
        CommandSpec::from_argv(&argv, &self.cwd, self.timeout).with_stdin(input)
    }
}

#[async_trait]
impl ReviewProvider for CommandProvider {
    async fn send(
        &self,
        system_prompt: &str,
        user_message: &str,
        model: &str,
    ) -> std::result::Result<String, ReviewError> {
        if self.argv.is_empty() {
            return Err(ReviewError::Provider("review command is empty".to_string()));
        }

        let spec = self.spec_for(model, format!("{system_prompt}\n\n{user_message}"));
        match self.runner.run(&spec).await {
            ProcessOutcome::Ok(out) => Ok(out.stdout),
            ProcessOutcome::CorrectnessFailure(out) => Err(ReviewError::Provider(format!(
                "'{}' exited with code {}: {}",
                spec.display(),
                out.exit_code,
                truncate_chars(out.stderr.trim(), 500)
            ))),
            ProcessOutcome::ToolingFailure(f) => match f.kind {
                ToolingFailureKind::TimedOut => Err(ReviewError::Timeout {
                    model: model.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
                ToolingFailureKind::SpawnFailed => Err(ReviewError::Provider(f.message)),
            },
        }
    }
}
