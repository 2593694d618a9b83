//! External collaborator boundaries.
//!
//! The engine never talks to a language model or tool directly. Each
//! reasoning call goes through one of the traits below, and the engine
//! wraps every call in its own timeout.

pub mod offline;

use crate::core::descriptor::TaskDescriptor;
use crate::core::task::AgentKind;
use crate::error::InvocationError;
use crate::memory::{GlobalHistory, Interaction, ScopedContext};
use crate::orchestration::intent::ContextRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type InvocationResult<T> = std::result::Result<T, InvocationError>;

/// What a worker hands back for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutput {
    /// Opaque result payload.
    pub result: Value,
    /// Reasoning steps taken, appended to the task window in order.
    pub steps: Vec<Interaction>,
}

impl WorkerOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            steps: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<Interaction>) -> Self {
        self.steps = steps;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

/// A validator's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub verdict: Verdict,
    pub feedback: String,
}

impl Assessment {
    pub fn pass(feedback: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Pass,
            feedback: feedback.into(),
        }
    }

    pub fn fail(feedback: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            feedback: feedback.into(),
        }
    }
}

/// Executes one task attempt for a given agent kind.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(
        &self,
        agent: AgentKind,
        context: &ScopedContext,
        description: &str,
    ) -> InvocationResult<WorkerOutput>;
}

/// Checks a result against the requirement text it was produced for.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        result: &Value,
        requirements: &str,
        context: &ScopedContext,
    ) -> InvocationResult<Assessment>;
}

/// Folds evicted records into a (possibly existing) summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        existing_summary: Option<&str>,
        evicted: &[Interaction],
    ) -> InvocationResult<String>;
}

/// Pre-call step deciding whether an invocation needs more context.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn needs_more_context(
        &self,
        recent: &[Interaction],
        summary: Option<&str>,
    ) -> InvocationResult<Option<ContextRequest>>;
}

/// Drafts the final response from the whole run's history.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// `scratch` holds the stage's own drafts and feedback from earlier attempts.
    async fn synthesize(
        &self,
        history: &GlobalHistory,
        scratch: &ScopedContext,
    ) -> InvocationResult<Value>;
}

/// Turns a request into a task list.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, request: &str) -> InvocationResult<Vec<TaskDescriptor>>;
}

/// Routes invocations to the worker registered for each agent kind.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<AgentKind, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: AgentKind, worker: Arc<dyn Worker>) {
        self.workers.insert(agent, worker);
    }

    pub fn with(mut self, agent: AgentKind, worker: Arc<dyn Worker>) -> Self {
        self.register(agent, worker);
        self
    }

    /// Register the same worker for every agent kind.
    pub fn with_all(mut self, worker: Arc<dyn Worker>) -> Self {
        for agent in AgentKind::ALL {
            self.register(agent, worker.clone());
        }
        self
    }

    pub fn supports(&self, agent: AgentKind) -> bool {
        self.workers.contains_key(&agent)
    }

    pub fn kinds(&self) -> Vec<AgentKind> {
        AgentKind::ALL
            .into_iter()
            .filter(|k| self.supports(*k))
            .collect()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[async_trait]
impl Worker for WorkerRegistry {
    async fn invoke(
        &self,
        agent: AgentKind,
        context: &ScopedContext,
        description: &str,
    ) -> InvocationResult<WorkerOutput> {
        match self.workers.get(&agent) {
            Some(worker) => worker.invoke(agent, context, description).await,
            None => Err(InvocationError::Unavailable(format!(
                "no worker registered for {}",
                agent
            ))),
        }
    }
}
