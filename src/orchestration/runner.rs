//! Per-task attempt loop.
//!
//! A `TaskRunner` drives one task from its first worker invocation to a
//! terminal state: intent step, worker call, intent step, validator call,
//! then either commit, retry with feedback, or fail. It reports every
//! transition back to the scheduler as a `TaskEvent` and never touches plan
//! state itself.

use crate::backend::{Validator, Verdict, Worker};
use crate::core::task::{AgentKind, TaskId};
use crate::error::InvocationError;
use crate::memory::{Interaction, MemoryStore, Role};
use crate::orchestration::intent::IntentStep;
use crate::orchestration::retry::{AttemptEvent, AttemptState, RetryPolicy};
use crate::orchestration::validation::{Subject, ValidationRecord};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Messages from a runner to the scheduler.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// The task entered a new non-terminal state.
    Transition { task_id: TaskId, state: AttemptState },
    /// A validation record was produced.
    Validated(ValidationRecord),
    /// The runner is done with the task.
    Finished { task_id: TaskId, outcome: TaskOutcome },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Done(Value),
    Failed {
        reason: String,
        /// Feedback of every failed attempt, oldest first.
        feedback_trail: Vec<String>,
    },
    Canceled,
}

/// What a runner needs to know about the task it executes.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task_id: TaskId,
    pub agent: AgentKind,
    pub description: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerTimeouts {
    pub worker: Duration,
    pub validator: Duration,
}

pub struct TaskRunner {
    workers: Arc<dyn Worker>,
    validator: Arc<dyn Validator>,
    memory: Arc<MemoryStore>,
    intent: Arc<IntentStep>,
    policy: RetryPolicy,
    timeouts: RunnerTimeouts,
}

impl TaskRunner {
    pub fn new(
        workers: Arc<dyn Worker>,
        validator: Arc<dyn Validator>,
        memory: Arc<MemoryStore>,
        intent: Arc<IntentStep>,
        policy: RetryPolicy,
        timeouts: RunnerTimeouts,
    ) -> Self {
        Self {
            workers,
            validator,
            memory,
            intent,
            policy,
            timeouts,
        }
    }

    /// Run a task to a terminal state. The last event sent is always
    /// `TaskEvent::Finished`.
    ///
    /// Cancellation is checked between external calls; a call already in
    /// flight is allowed to return first.
    pub async fn run(
        &self,
        assignment: Assignment,
        token: CancellationToken,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) {
        let task_id = assignment.task_id.clone();
        let mut state = AttemptState::start();
        let mut pending: Option<Value> = None;
        let mut trail: Vec<String> = Vec::new();

        let _ = events.send(TaskEvent::Transition {
            task_id: task_id.clone(),
            state: state.clone(),
        });

        loop {
            if token.is_cancelled() && !state.is_terminal() {
                info!(task = %task_id, state = state.name(), "task canceled");
                state = self.advance(&task_id, state, AttemptEvent::Cancel);
            }

            let event = match &state {
                AttemptState::Running { attempt } => {
                    let (event, result) = self.attempt(&assignment, *attempt, &events).await;
                    pending = result;
                    event
                }
                AttemptState::AwaitingValidation { attempt } => {
                    let result = pending.clone().unwrap_or(Value::Null);
                    self.check(&assignment, *attempt, &result, &events).await
                }
                AttemptState::Retrying { attempt, feedback } => {
                    self.record(&task_id, Interaction::feedback(*attempt, feedback))
                        .await;
                    AttemptEvent::Resume
                }
                AttemptState::Done { .. }
                | AttemptState::Failed { .. }
                | AttemptState::Canceled => break,
            };

            if let AttemptEvent::Rejected(feedback) | AttemptEvent::InvocationFailed(feedback) =
                &event
            {
                trail.push(feedback.clone());
            }

            state = self.advance(&task_id, state, event);
            if !state.is_terminal() {
                let _ = events.send(TaskEvent::Transition {
                    task_id: task_id.clone(),
                    state: state.clone(),
                });
            }
        }

        let outcome = match state {
            AttemptState::Done { attempt } => {
                if let Err(e) = self.memory.seal(&task_id).await {
                    warn!(task = %task_id, error = %e, "failed to seal window");
                }
                info!(task = %task_id, attempt, "task done");
                TaskOutcome::Done(pending.unwrap_or(Value::Null))
            }
            AttemptState::Failed { reason } => {
                warn!(task = %task_id, reason = %reason, "task failed");
                TaskOutcome::Failed {
                    reason,
                    feedback_trail: trail,
                }
            }
            _ => TaskOutcome::Canceled,
        };

        let _ = events.send(TaskEvent::Finished { task_id, outcome });
    }

    fn advance(&self, task_id: &TaskId, state: AttemptState, event: AttemptEvent) -> AttemptState {
        match state.next(event, &self.policy) {
            Ok(next) => next,
            Err(e) => {
                error!(task = %task_id, error = %e, "illegal attempt transition");
                AttemptState::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// One worker invocation. Returns the event to apply and the result, if any.
    async fn attempt(
        &self,
        assignment: &Assignment,
        attempt: u32,
        events: &mpsc::UnboundedSender<TaskEvent>,
    ) -> (AttemptEvent, Option<Value>) {
        let task_id = &assignment.task_id;
        let mut context = match self.memory.context_for(task_id).await {
            Ok(context) => context,
            Err(e) => return (AttemptEvent::InvocationFailed(e.to_string()), None),
        };
        self.intent.augment(&self.memory, &mut context).await;

        debug!(
            task = %task_id,
            agent = %assignment.agent,
            attempt,
            visible = ?context.visible_tasks(),
            "invoking worker"
        );

        let timeout = self.timeouts.worker;
        let outcome = tokio::time::timeout(
            timeout,
            self.workers
                .invoke(assignment.agent, &context, &assignment.description),
        )
        .await
        .unwrap_or(Err(InvocationError::Timeout(timeout)));

        match outcome {
            Ok(output) => {
                for step in output.steps {
                    self.record(task_id, step).await;
                }
                let role = Role::Worker(assignment.agent);
                self.record(task_id, Interaction::result(role, attempt, &output.result))
                    .await;
                (AttemptEvent::Produced, Some(output.result))
            }
            Err(e) => {
                let reason = format!("worker invocation failed: {}", e);
                warn!(task = %task_id, attempt, error = %e, "worker invocation failed");
                let _ = events.send(TaskEvent::Validated(ValidationRecord::new(
                    Subject::Task(task_id.clone()),
                    attempt,
                    Verdict::Fail,
                    &reason,
                )));
                (AttemptEvent::InvocationFailed(reason), None)
            }
        }
    }

    /// One validator invocation over the attempt's result.
    async fn check(
        &self,
        assignment: &Assignment,
        attempt: u32,
        result: &Value,
        events: &mpsc::UnboundedSender<TaskEvent>,
    ) -> AttemptEvent {
        let task_id = &assignment.task_id;
        let mut context = match self.memory.context_for(task_id).await {
            Ok(context) => context,
            Err(e) => return AttemptEvent::ValidatorFailed(e.to_string()),
        };
        self.intent.augment(&self.memory, &mut context).await;

        let timeout = self.timeouts.validator;
        let outcome = tokio::time::timeout(
            timeout,
            self.validator
                .validate(result, &assignment.description, &context),
        )
        .await
        .unwrap_or(Err(InvocationError::Timeout(timeout)));

        match outcome {
            Ok(assessment) => {
                info!(
                    task = %task_id,
                    attempt,
                    verdict = ?assessment.verdict,
                    feedback = %assessment.feedback,
                    "validation verdict"
                );
                let _ = events.send(TaskEvent::Validated(ValidationRecord::new(
                    Subject::Task(task_id.clone()),
                    attempt,
                    assessment.verdict,
                    &assessment.feedback,
                )));
                match assessment.verdict {
                    Verdict::Pass => AttemptEvent::Passed,
                    Verdict::Fail => AttemptEvent::Rejected(assessment.feedback),
                }
            }
            Err(e) => {
                error!(task = %task_id, attempt, error = %e, "validator invocation failed");
                AttemptEvent::ValidatorFailed(e.to_string())
            }
        }
    }

    /// Append to the task window. Summarization failures are not fatal.
    async fn record(&self, task_id: &TaskId, interaction: Interaction) {
        if let Err(e) = self.memory.append(task_id, interaction).await {
            warn!(task = %task_id, error = %e, "memory append incomplete");
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("policy", &self.policy)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}
