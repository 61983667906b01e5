//! External command execution.
//!
//! This is the only place where compiler, test runner, git and reviewer
//! commands are spawned. Every invocation resolves to a [`ProcessOutcome`]:
//! callers match on the tag instead of inspecting error payloads.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Default cap on captured stdout/stderr per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// A command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    /// Arguments passed to the executable.
    pub args: Vec<String>,

    /// Working directory.
    pub cwd: PathBuf,

    /// Hard timeout for the whole invocation.
    pub timeout: Duration,

    /// Optional data written to the child's stdin.
    pub stdin: Option<String>,
}

impl CommandSpec {
    /// Build a spec from an argv vector (first element is the executable).
    ///
    /// An empty argv yields an empty program name, which fails to spawn.
    pub fn from_argv(argv: &[String], cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        let (program, args) = match argv.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            program,
            args,
            cwd: cwd.into(),
            timeout,
            stdin: None,
        }
    }

    pub fn new<I, S>(program: &str, args: I, cwd: impl Into<PathBuf>, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
            timeout,
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Command line as a single display string.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured output of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// stdout followed by stderr, skipping empty streams.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Why a command could not produce a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolingFailureKind {
    SpawnFailed,
    TimedOut,
}

/// A command that could not run or did not finish in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolingFailure {
    pub kind: ToolingFailureKind,
    pub message: String,
}

/// Tagged result of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exit status zero.
    Ok(CommandOutput),
    /// Ran to completion with a non-zero exit status.
    CorrectnessFailure(CommandOutput),
    /// Could not be spawned, or exceeded its timeout.
    ToolingFailure(ToolingFailure),
}

impl ProcessOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProcessOutcome::Ok(_))
    }

    /// Captured output, if the command ran to completion.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            ProcessOutcome::Ok(out) | ProcessOutcome::CorrectnessFailure(out) => Some(out),
            ProcessOutcome::ToolingFailure(_) => None,
        }
    }

    /// Trimmed stdout of a successful command.
    pub fn ok_stdout(&self) -> Option<&str> {
        match self {
            ProcessOutcome::Ok(out) => Some(out.stdout.trim()),
            _ => None,
        }
    }
}

/// Executes commands. Swap in a scripted runner for tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> ProcessOutcome;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    max_output_bytes: usize,
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let s = String::from_utf8_lossy(bytes);
        if s.len() > self.max_output_bytes {
            format!(
                "{}\n... (output truncated)",
                truncate_chars(&s, self.max_output_bytes)
            )
        } else {
            s.into_owned()
        }
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> ProcessOutcome {
        let start = Instant::now();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ProcessOutcome::ToolingFailure(ToolingFailure {
                    kind: ToolingFailureKind::SpawnFailed,
                    message: format!("failed to run '{}': {}", spec.display(), e),
                })
            }
        };

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            let input = input.clone();
            // Feed stdin concurrently so a chatty child cannot deadlock on a full pipe.
            tokio::spawn(async move {
                let _ = stdin.write_all(input.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ProcessOutcome::ToolingFailure(ToolingFailure {
                    kind: ToolingFailureKind::SpawnFailed,
                    message: format!("failed to collect output of '{}': {}", spec.display(), e),
                })
            }
            Err(_) => {
                return ProcessOutcome::ToolingFailure(ToolingFailure {
                    kind: ToolingFailureKind::TimedOut,
                    message: format!(
                        "'{}' timed out after {}ms",
                        spec.display(),
                        spec.timeout.as_millis()
                    ),
                })
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: self.decode(&output.stdout),
            stderr: self.decode(&output.stderr),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if output.status.success() {
            ProcessOutcome::Ok(result)
        } else {
            ProcessOutcome::CorrectnessFailure(result)
        }
    }
}

/// Truncate to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_chars(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(argv: &[&str]) -> CommandSpec {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        CommandSpec::from_argv(&argv, ".", Duration::from_secs(30))
    }

    #[test]
    fn test_from_argv_splits_program() {
        let s = spec(&["npx", "tsc", "--noEmit"]);
        assert_eq!(s.program, "npx");
        assert_eq!(s.args, vec!["tsc", "--noEmit"]);
        assert_eq!(s.display(), "npx tsc --noEmit");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "h");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "a".to_string(),
            stderr: "b".to_string(),
            duration_ms: 0,
        };
        assert_eq!(out.combined(), "a\nb");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let outcome = TokioCommandRunner::new().run(&spec(&["echo", "hello"])).await;
        assert!(outcome.is_ok());
        assert!(outcome.output().unwrap().stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let outcome = TokioCommandRunner::new().run(&spec(&["false"])).await;
        assert!(matches!(outcome, ProcessOutcome::CorrectnessFailure(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_tooling_failure() {
        let outcome = TokioCommandRunner::new()
            .run(&spec(&["relaygate-nonexistent-command-12345"]))
            .await;
        match outcome {
            ProcessOutcome::ToolingFailure(f) => assert_eq!(f.kind, ToolingFailureKind::SpawnFailed),
            other => panic!("expected tooling failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_tooling_failure() {
        let mut s = spec(&["sleep", "5"]);
        s.timeout = Duration::from_millis(50);
        match TokioCommandRunner::new().run(&s).await {
            ProcessOutcome::ToolingFailure(f) => {
                assert_eq!(f.kind, ToolingFailureKind::TimedOut);
                assert!(f.message.contains("timed out after 50ms"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let s = spec(&["cat"]).with_stdin("piped input");
        let outcome = TokioCommandRunner::new().run(&s).await;
        assert_eq!(outcome.ok_stdout(), Some("piped input"));
    }
}
