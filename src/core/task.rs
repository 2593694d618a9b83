//! Task data model for the execution plan.
//!
//! Tasks are the atomic units of decomposed work. Each task tracks its
//! assigned agent kind, its dependencies, lifecycle status, result payload
//! and retry bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a task within one execution plan.
///
/// Ids come from the decomposition step and are only required to be unique
/// within a plan, so they are kept as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for TaskId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of worker specializations a task can be assigned to.
///
/// Every kind is served through the same invocation interface; the kind
/// only selects which registered worker receives the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Web search and page scraping.
    #[serde(alias = "ResearchExpert", alias = "research_expert")]
    Research,
    /// Weather lookups.
    #[serde(alias = "WeatherExpert", alias = "weather_expert")]
    Weather,
    /// Code generation and execution.
    #[serde(alias = "CodeExpert", alias = "code_expert")]
    Code,
    /// Response drafting over gathered material.
    #[serde(
        alias = "ResponseSynthesizerExpert",
        alias = "response_synthesizer_expert"
    )]
    Synthesizer,
    /// Anything without a dedicated specialization.
    General,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Research,
        AgentKind::Weather,
        AgentKind::Code,
        AgentKind::Synthesizer,
        AgentKind::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Research => "research",
            AgentKind::Weather => "weather",
            AgentKind::Code => "code",
            AgentKind::Synthesizer => "synthesizer",
            AgentKind::General => "general",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "research" | "ResearchExpert" => Ok(AgentKind::Research),
            "weather" | "WeatherExpert" => Ok(AgentKind::Weather),
            "code" | "CodeExpert" => Ok(AgentKind::Code),
            "synthesizer" | "ResponseSynthesizerExpert" => Ok(AgentKind::Synthesizer),
            "general" => Ok(AgentKind::General),
            other => Err(format!("unknown agent kind '{}'", other)),
        }
    }
}

/// Task status in its lifecycle.
///
/// `Done`, `Failed`, `Blocked` and `Canceled` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Waiting on at least one dependency.
    Pending,
    /// All dependencies done, waiting for a pool slot.
    Ready,
    /// A worker invocation is in flight.
    Running,
    /// The worker returned; the validator has the result.
    AwaitingValidation,
    /// The last attempt was rejected and another one is about to start.
    Retrying,
    /// Result validated and committed.
    Done,
    /// Retries exhausted or the validator itself failed.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// An ancestor failed; never invoked.
    Blocked {
        /// Reason why the task is blocked.
        reason: String,
    },
    /// The run was canceled before this task finished.
    Canceled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Short name without payload, used in transition errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::AwaitingValidation => "awaiting_validation",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Done => "done",
            TaskStatus::Failed { .. } => "failed",
            TaskStatus::Blocked { .. } => "blocked",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done
                | TaskStatus::Failed { .. }
                | TaskStatus::Blocked { .. }
                | TaskStatus::Canceled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Blocked { reason } => write!(f, "blocked: {}", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// A single task in the execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the plan.
    pub id: TaskId,
    /// What the worker is asked to do. Also the requirement text the
    /// validator checks the result against.
    pub description: String,
    /// Worker specialization that executes this task.
    pub agent: AgentKind,
    /// Direct dependencies, in the order the decomposition listed them.
    pub dependencies: Vec<TaskId>,
    /// Current execution status.
    pub status: TaskStatus,
    /// Validated result payload, opaque to the engine.
    pub result: Option<Value>,
    /// Number of rejected attempts so far.
    pub retry_count: u32,
    /// Feedback from the most recent rejection.
    pub last_feedback: Option<String>,
    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        description: &str,
        agent: AgentKind,
        dependencies: Vec<TaskId>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.to_string(),
            agent,
            dependencies,
            status: TaskStatus::Pending,
            result: None,
            retry_count: 0,
            last_feedback: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Dependencies satisfied; waiting for dispatch.
    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    /// A worker invocation started. Records the start time on the first attempt.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn await_validation(&mut self) {
        self.status = TaskStatus::AwaitingValidation;
    }

    /// Record a rejection and move to Retrying.
    pub fn retry(&mut self, feedback: &str) {
        self.status = TaskStatus::Retrying;
        self.retry_count += 1;
        self.last_feedback = Some(feedback.to_string());
    }

    /// Commit a validated result.
    pub fn complete(&mut self, result: Value) {
        self.status = TaskStatus::Done;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn block(&mut self, reason: &str) {
        self.status = TaskStatus::Blocked {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = TaskStatus::Canceled;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task can be dispatched (Pending or Ready).
    pub fn can_start(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Ready)
    }
}

/// A validated task result, as reported to callers and the synthesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub agent: AgentKind,
    pub result: Value,
}
