//! Scheduler for parallel task execution.
//!
//! The Scheduler owns the plan for the duration of a run and is the only
//! writer of plan-wide state (task statuses, remaining dependency counts,
//! the ready set). Runners report back over a channel and the scheduler
//! applies their events one at a time, in arrival order. Among tasks that
//! become ready at the same moment, dispatch follows plan order.

use crate::core::plan::ExecutionPlan;
use crate::core::task::{AgentKind, TaskId, TaskStatus};
use crate::engine::RunId;
use crate::error::Result;
use crate::orchestration::pool::{panic_message, WorkerPool};
use crate::orchestration::retry::AttemptState;
use crate::orchestration::runner::{Assignment, TaskEvent, TaskOutcome, TaskRunner};
use crate::orchestration::validation::ValidationLog;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Events emitted during a run.
///
/// These let observers follow a run without polling.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A task has been handed to a runner.
    TaskStarted { task_id: TaskId, agent: AgentKind },
    /// A task moved between non-terminal states.
    TaskStatusChanged { task_id: TaskId, status: TaskStatus },
    /// A task reached a terminal state.
    TaskFinished { task_id: TaskId, status: TaskStatus },
    /// Descendants of a failed task were blocked.
    TasksBlocked { failed: TaskId, blocked: Vec<TaskId> },
    /// The synthesis stage started an attempt.
    SynthesisStarted { attempt: u32 },
    /// The run is over.
    RunFinished { run_id: RunId, outcome: String },
}

/// A task that exhausted its retries or whose validator failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub reason: String,
    pub feedback_trail: Vec<String>,
}

/// A task that was never invoked because an ancestor failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: TaskId,
    pub reason: String,
}

/// State of the plan once the scheduler returns.
#[derive(Debug)]
pub struct SchedulerReport {
    pub plan: ExecutionPlan,
    pub validations: ValidationLog,
    pub failures: Vec<TaskFailure>,
    pub blocked: Vec<BlockedTask>,
    pub canceled: Vec<TaskId>,
}

/// Send an event without waiting. An observer that falls behind misses
/// events once its channel is full; the run itself never waits on it.
pub(crate) fn emit_event(tx: Option<&mpsc::Sender<EngineEvent>>, event: EngineEvent) {
    let Some(tx) = tx else {
        return;
    };
    if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
        debug!(event = ?event, "event channel full, event dropped");
    }
}

pub struct Scheduler {
    plan: ExecutionPlan,
    pool: WorkerPool,
    runner: Arc<TaskRunner>,
    /// Dependencies not yet Done, by plan position.
    remaining: Vec<usize>,
    /// Ready tasks by plan position; iteration order is dispatch order.
    ready: BTreeSet<usize>,
    validations: ValidationLog,
    failures: Vec<TaskFailure>,
    blocked: Vec<BlockedTask>,
    event_tx: Option<mpsc::Sender<EngineEvent>>,
    token: CancellationToken,
}

impl Scheduler {
    pub fn new(
        plan: ExecutionPlan,
        runner: Arc<TaskRunner>,
        max_concurrent: usize,
        token: CancellationToken,
    ) -> Self {
        let remaining = plan.in_degrees();
        Self {
            plan,
            pool: WorkerPool::new(max_concurrent),
            runner,
            remaining,
            ready: BTreeSet::new(),
            validations: ValidationLog::new(),
            failures: Vec::new(),
            blocked: Vec::new(),
            event_tx: None,
            token,
        }
    }

    /// Emit lifecycle events on the given channel.
    pub fn with_events(mut self, event_tx: mpsc::Sender<EngineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    fn emit(&self, event: EngineEvent) {
        emit_event(self.event_tx.as_ref(), event);
    }

    /// Run every task to a terminal state.
    ///
    /// This is the main entry point for task execution. It:
    /// 1. Dispatches ready tasks, in plan order, while the pool has capacity
    /// 2. Waits for runner events
    /// 3. Applies completions (unlocking dependents) and failures (blocking
    ///    descendants)
    /// 4. Repeats until nothing is running and nothing is ready
    ///
    /// On cancellation no new task is dispatched; in-flight runners stop at
    /// their next boundary and everything left unfinished is marked Canceled.
    pub async fn run(mut self) -> Result<SchedulerReport> {
        info!(
            tasks = self.plan.len(),
            max_concurrent = self.pool.max_concurrent(),
            "scheduler started"
        );

        for pos in 0..self.plan.len() {
            if self.remaining[pos] == 0 {
                self.make_ready(pos);
            }
        }

        let (task_tx, mut task_rx) = mpsc::unbounded_channel();
        let token = self.token.clone();
        let mut cancel_seen = false;

        loop {
            if !token.is_cancelled() {
                self.dispatch_ready_tasks(&task_tx)?;
            }

            if self.pool.active_count() == 0 && (self.ready.is_empty() || token.is_cancelled()) {
                break;
            }

            tokio::select! {
                Some(event) = task_rx.recv() => self.handle_event(event),
                Some((task_id, err)) = self.pool.next_lost() => {
                    self.handle_lost_runner(task_id, err);
                }
                _ = token.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!(in_flight = self.pool.active_count(), "cancellation requested");
                }
                else => break,
            }
        }

        if token.is_cancelled() {
            self.cancel_unfinished();
        }

        let canceled = self
            .plan
            .ids_where(|s| matches!(s, TaskStatus::Canceled));
        info!(
            done = self.plan.ids_where(|s| *s == TaskStatus::Done).len(),
            failed = self.failures.len(),
            blocked = self.blocked.len(),
            canceled = canceled.len(),
            "scheduler finished"
        );

        Ok(SchedulerReport {
            plan: self.plan,
            validations: self.validations,
            failures: self.failures,
            blocked: self.blocked,
            canceled,
        })
    }

    fn make_ready(&mut self, pos: usize) {
        if let Some(task) = self.plan.task_at_mut(pos) {
            if task.status == TaskStatus::Pending {
                task.mark_ready();
                debug!(task = %task.id, "task ready");
                self.ready.insert(pos);
            }
        }
    }

    /// Dispatch ready tasks to runners while the pool has capacity.
    /// Returns the number of tasks dispatched.
    pub fn dispatch_ready_tasks(
        &mut self,
        task_tx: &mpsc::UnboundedSender<TaskEvent>,
    ) -> Result<usize> {
        let mut dispatched = 0;

        while self.pool.has_capacity() {
            let Some(pos) = self.ready.pop_first() else {
                break;
            };
            let Some(task) = self.plan.task_at_mut(pos) else {
                continue;
            };
            task.start();
            let assignment = Assignment {
                task_id: task.id.clone(),
                agent: task.agent,
                description: task.description.clone(),
            };
            let task_id = assignment.task_id.clone();
            let agent = assignment.agent;

            let runner = Arc::clone(&self.runner);
            let child = self.token.child_token();
            let tx = task_tx.clone();
            self.pool.spawn(&task_id, async move {
                runner.run(assignment, child, tx).await;
            })?;

            info!(task = %task_id, agent = %agent, "task dispatched");
            self.emit(EngineEvent::TaskStarted { task_id, agent });
            dispatched += 1;
        }

        Ok(dispatched)
    }

    fn handle_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Transition { task_id, state } => {
                let Some(task) = self.plan.get_task_mut(&task_id) else {
                    return;
                };
                // Late events of a runner that was already written off.
                if task.is_terminal() {
                    return;
                }
                match &state {
                    AttemptState::Running { attempt } => {
                        task.start();
                        debug!(task = %task_id, attempt, "attempt started");
                    }
                    AttemptState::AwaitingValidation { .. } => task.await_validation(),
                    AttemptState::Retrying { attempt, feedback } => {
                        task.retry(feedback);
                        info!(task = %task_id, attempt, feedback = %feedback, "retrying task");
                    }
                    _ => return,
                }
                let status = task.status.clone();
                self.emit(EngineEvent::TaskStatusChanged { task_id, status });
            }
            TaskEvent::Validated(record) => self.validations.push(record),
            TaskEvent::Finished { task_id, outcome } => self.finish_task(task_id, outcome),
        }
    }

    /// Release the task's slot and apply its terminal outcome.
    fn finish_task(&mut self, task_id: TaskId, outcome: TaskOutcome) {
        self.pool.finish(&task_id);
        match outcome {
            TaskOutcome::Done(result) => self.handle_completion(&task_id, result),
            TaskOutcome::Failed {
                reason,
                feedback_trail,
            } => self.handle_failure(&task_id, reason, feedback_trail),
            TaskOutcome::Canceled => {
                if let Some(task) = self.plan.get_task_mut(&task_id) {
                    task.cancel();
                }
            }
        }
        if let Some(task) = self.plan.get_task(&task_id) {
            let status = task.status.clone();
            self.emit(EngineEvent::TaskFinished { task_id, status });
        }
    }

    /// A runner ended without reporting, so its task is failed here.
    fn handle_lost_runner(&mut self, task_id: TaskId, err: JoinError) {
        let reason = if err.is_panic() {
            format!("runner panicked: {}", panic_message(err))
        } else {
            format!("runner stopped: {}", err)
        };
        error!(task = %task_id, reason = %reason, "runner exited without reporting");
        self.finish_task(
            task_id,
            TaskOutcome::Failed {
                reason,
                feedback_trail: Vec::new(),
            },
        );
    }

    /// Commit a validated result and release dependents whose last
    /// outstanding dependency this was.
    fn handle_completion(&mut self, task_id: &TaskId, result: Value) {
        let Some(pos) = self.plan.position(task_id) else {
            return;
        };
        if let Some(task) = self.plan.task_at_mut(pos) {
            task.complete(result);
        }

        let dependents = self.plan.dependents_at(pos).to_vec();
        for child in dependents {
            self.remaining[child] = self.remaining[child].saturating_sub(1);
            if self.remaining[child] == 0 {
                self.make_ready(child);
            }
        }
    }

    /// Record a failure and block every transitive descendant.
    fn handle_failure(&mut self, task_id: &TaskId, reason: String, feedback_trail: Vec<String>) {
        if let Some(task) = self.plan.get_task_mut(task_id) {
            task.fail(&reason);
        }
        self.failures.push(TaskFailure {
            task_id: task_id.clone(),
            reason,
            feedback_trail,
        });

        let block_reason = format!("ancestor {} failed", task_id);
        let mut newly_blocked = Vec::new();
        for descendant in self.plan.descendants(task_id) {
            let Some(pos) = self.plan.position(&descendant) else {
                continue;
            };
            let Some(task) = self.plan.task_at_mut(pos) else {
                continue;
            };
            if task.is_terminal() {
                continue;
            }
            task.block(&block_reason);
            self.ready.remove(&pos);
            self.blocked.push(BlockedTask {
                task_id: descendant.clone(),
                reason: block_reason.clone(),
            });
            newly_blocked.push(descendant);
        }

        if !newly_blocked.is_empty() {
            warn!(
                failed = %task_id,
                blocked = ?newly_blocked,
                "blocking descendants of failed task"
            );
            self.emit(EngineEvent::TasksBlocked {
                failed: task_id.clone(),
                blocked: newly_blocked,
            });
        }
    }

    fn cancel_unfinished(&mut self) {
        self.ready.clear();
        let unfinished = self.plan.ids_where(|s| !s.is_terminal());
        for task_id in unfinished {
            if let Some(task) = self.plan.get_task_mut(&task_id) {
                task.cancel();
            }
            debug!(task = %task_id, "task canceled before dispatch");
            self.emit(EngineEvent::TaskFinished {
                task_id,
                status: TaskStatus::Canceled,
            });
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("plan", &self.plan)
            .field("ready", &self.ready)
            .field("active", &self.pool.active_count())
            .finish()
    }
}
