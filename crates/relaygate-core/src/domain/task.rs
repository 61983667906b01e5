//! Task context supplied by the orchestrating caller.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kind of work a task represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Feature,
    Bugfix,
    Refactor,
    Test,
    Docs,
    Chore,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Feature => "feature",
            TaskType::Bugfix => "bugfix",
            TaskType::Refactor => "refactor",
            TaskType::Test => "test",
            TaskType::Docs => "docs",
            TaskType::Chore => "chore",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "feature" => Ok(TaskType::Feature),
            "bugfix" | "fix" => Ok(TaskType::Bugfix),
            "refactor" => Ok(TaskType::Refactor),
            "test" => Ok(TaskType::Test),
            "docs" => Ok(TaskType::Docs),
            "chore" => Ok(TaskType::Chore),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// What the pipeline is evaluating a diff against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub task_id: String,
    pub description: String,
    pub task_type: TaskType,
    /// Working tree the diff was produced in.
    pub working_dir: PathBuf,
    /// Teammate that authored the diff, if known.
    #[serde(default)]
    pub author: Option<String>,
}

impl TaskContext {
    pub fn new(
        task_id: impl Into<String>,
        description: impl Into<String>,
        task_type: TaskType,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            task_type,
            working_dir: working_dir.into(),
            author: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn is_feature(&self) -> bool {
        self.task_type == TaskType::Feature
    }
}
