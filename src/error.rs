use crate::core::task::{AgentKind, TaskId};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Plan rejected: {0}")]
    Plan(#[from] PlanError),

    #[error("Invocation failed: {0}")]
    Invocation(#[from] InvocationError),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No worker registered for agent kind: {0}")]
    AgentNotAvailable(AgentKind),

    #[error("Task not found in plan: {0}")]
    TaskNotFound(TaskId),

    #[error("Worker pool at capacity (max: {max})")]
    PoolFull { max: usize },

    #[error("Task already has an invocation in flight: {0}")]
    TaskAlreadyRunning(TaskId),

    #[error("Summarization failed: {0}")]
    Summarization(String),
}

/// Build-time rejections of a decomposed task list.
///
/// All variants are fatal to plan acceptance; no task is invoked when a
/// plan fails to build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("duplicate task id: {0}")]
    DuplicateId(TaskId),

    #[error("task {task} depends on unknown task {missing}")]
    UnknownDependency { task: TaskId, missing: TaskId },

    #[error("dependency cycle among tasks: {}", format_ids(.remaining))]
    CycleDetected {
        /// Tasks left over once no further zero in-degree node could be peeled.
        remaining: Vec<TaskId>,
    },
}

/// Failure of an external call (worker, validator, summarizer, intent, synthesizer).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl InvocationError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, InvocationError::Timeout(_))
    }
}

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
