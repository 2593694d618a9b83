//! Engine facade: one call runs a plan (or a request) end to end.

use crate::backend::{
    Decomposer, IntentClassifier, Summarizer, Synthesizer, Validator, Worker, WorkerRegistry,
};
use crate::config::EngineConfig;
use crate::core::plan::ExecutionPlan;
use crate::core::task::{TaskId, TaskResult};
use crate::error::{Error, InvocationError, Result};
use crate::memory::{GlobalHistory, MemoryStore};
use crate::orchestration::scheduler::{
    emit_event, BlockedTask, EngineEvent, Scheduler, SchedulerReport, TaskFailure,
};
use crate::orchestration::{
    IntentStep, SynthesisOutcome, SynthesisStage, TaskRunner, ValidationRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Requirement text handed to the validator for the final response when the
/// run did not start from a request.
const DEFAULT_SYNTHESIS_REQUIREMENT: &str =
    "Combine the validated task results into one complete final response.";

/// Unique identifier for one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters, for logs.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A successful run.
#[derive(Debug, Clone, Serialize)]
pub struct FinalOutput {
    pub run_id: RunId,
    pub final_response: Value,
    pub per_task_results: Vec<TaskResult>,
    pub failed_tasks: Vec<TaskId>,
    pub blocked_tasks: Vec<TaskId>,
    pub failures: Vec<TaskFailure>,
    pub blocked: Vec<BlockedTask>,
    pub canceled_tasks: Vec<TaskId>,
    pub validations: Vec<ValidationRecord>,
    pub synthesis_trail: Vec<ValidationRecord>,
}

/// Everything known about a run that did not produce a final response.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub run_id: RunId,
    pub reason: String,
    /// Results of the tasks that did reach Done.
    pub partial_results: Vec<TaskResult>,
    pub failed_tasks: Vec<TaskId>,
    pub blocked_tasks: Vec<TaskId>,
    pub failures: Vec<TaskFailure>,
    pub blocked: Vec<BlockedTask>,
    pub canceled_tasks: Vec<TaskId>,
    pub validations: Vec<ValidationRecord>,
    pub synthesis_trail: Vec<ValidationRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    Completed(FinalOutput),
    SynthesisFailed(FailureReport),
    Canceled(FailureReport),
}

impl RunOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::SynthesisFailed(_) => "synthesis_failed",
            RunOutcome::Canceled(_) => "canceled",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn run_id(&self) -> RunId {
        match self {
            RunOutcome::Completed(out) => out.run_id,
            RunOutcome::SynthesisFailed(report) | RunOutcome::Canceled(report) => report.run_id,
        }
    }
}

/// The external collaborators an engine calls.
#[derive(Clone)]
pub struct Backends {
    pub workers: WorkerRegistry,
    pub validator: Arc<dyn Validator>,
    pub summarizer: Arc<dyn Summarizer>,
    pub intent: Arc<dyn IntentClassifier>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

pub struct Engine {
    config: EngineConfig,
    backends: Backends,
    decomposer: Option<Arc<dyn Decomposer>>,
    event_tx: Option<mpsc::Sender<EngineEvent>>,
}

impl Engine {
    /// Create an engine. The config is validated up front.
    pub fn new(config: EngineConfig, backends: Backends) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backends,
            decomposer: None,
            event_tx: None,
        })
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn Decomposer>) -> Self {
        self.decomposer = Some(decomposer);
        self
    }

    /// Emit `EngineEvent`s on the given channel.
    ///
    /// Events are sent without waiting: once the channel is full, further
    /// events are dropped until the observer catches up. Size the channel
    /// for the plan if every event matters.
    pub fn with_events(mut self, event_tx: mpsc::Sender<EngineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decompose a request, build its plan and run it.
    pub async fn run_request(&self, request: &str, token: CancellationToken) -> Result<RunOutcome> {
        let decomposer = self
            .decomposer
            .as_ref()
            .ok_or_else(|| Error::Validation("no decomposer configured".to_string()))?;

        let timeout = self.config.timeouts.decomposer();
        let descriptors = tokio::time::timeout(timeout, decomposer.decompose(request))
            .await
            .unwrap_or(Err(InvocationError::Timeout(timeout)))?;
        info!(tasks = descriptors.len(), "request decomposed");

        let plan = ExecutionPlan::build(&descriptors)?;
        self.execute(plan, Some(request), token).await
    }

    /// Run an accepted plan to completion.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotAvailable` before any invocation if the plan uses an
    /// agent kind with no registered worker. Task failures, blocking and
    /// synthesis failure are reported in the `RunOutcome`, not as errors.
    pub async fn run(&self, plan: ExecutionPlan, token: CancellationToken) -> Result<RunOutcome> {
        self.execute(plan, None, token).await
    }

    async fn execute(
        &self,
        plan: ExecutionPlan,
        request: Option<&str>,
        token: CancellationToken,
    ) -> Result<RunOutcome> {
        let run_id = RunId::new();
        let span = info_span!("run", id = %run_id.short());
        self.execute_inner(run_id, plan, request, token)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        run_id: RunId,
        plan: ExecutionPlan,
        request: Option<&str>,
        token: CancellationToken,
    ) -> Result<RunOutcome> {
        self.check_agents(&plan)?;
        info!(
            tasks = plan.len(),
            dependencies = plan.dependency_count(),
            "plan accepted"
        );

        let memory = Arc::new(MemoryStore::for_plan(
            &plan,
            Arc::clone(&self.backends.summarizer),
            self.config.window_settings(),
        ));
        let intent = Arc::new(IntentStep::new(
            Arc::clone(&self.backends.intent),
            self.config.memory.intent_window,
            self.config.timeouts.intent(),
        ));
        let workers: Arc<dyn Worker> = Arc::new(self.backends.workers.clone());
        let runner = Arc::new(TaskRunner::new(
            workers,
            Arc::clone(&self.backends.validator),
            Arc::clone(&memory),
            Arc::clone(&intent),
            self.config.task_policy(),
            self.config.runner_timeouts(),
        ));

        let mut scheduler =
            Scheduler::new(plan, runner, self.config.max_concurrency, token.clone());
        if let Some(tx) = &self.event_tx {
            scheduler = scheduler.with_events(tx.clone());
        }
        let report = scheduler.run().await?;

        let outcome = if token.is_cancelled() {
            RunOutcome::Canceled(failure_report(
                run_id,
                "run canceled".to_string(),
                report,
                Vec::new(),
            ))
        } else {
            let history = GlobalHistory {
                request: request.map(str::to_string),
                windows: memory.global_context().await,
                validations: report.validations.records().to_vec(),
                results: report.plan.snapshot().results(),
            };
            let stage = SynthesisStage::new(
                Arc::clone(&self.backends.synthesizer),
                Arc::clone(&self.backends.validator),
                intent,
                self.config.synthesis_policy(),
                self.config.synthesis_timeouts(),
            );
            let requirements = request.unwrap_or(DEFAULT_SYNTHESIS_REQUIREMENT);
            match stage
                .run(&history, requirements, &token, self.event_tx.as_ref())
                .await
            {
                SynthesisOutcome::Completed { response, trail } => {
                    RunOutcome::Completed(final_output(run_id, response, report, trail))
                }
                SynthesisOutcome::Failed { reason, trail } => RunOutcome::SynthesisFailed(
                    failure_report(run_id, reason, report, trail),
                ),
                SynthesisOutcome::Canceled { trail } => RunOutcome::Canceled(failure_report(
                    run_id,
                    "run canceled during synthesis".to_string(),
                    report,
                    trail,
                )),
            }
        };

        match &outcome {
            RunOutcome::Completed(_) => info!("run completed"),
            other => error!(outcome = other.name(), "run did not complete"),
        }
        emit_event(
            self.event_tx.as_ref(),
            EngineEvent::RunFinished {
                run_id,
                outcome: outcome.name().to_string(),
            },
        );
        Ok(outcome)
    }

    /// Every agent kind used by the plan must have a registered worker.
    fn check_agents(&self, plan: &ExecutionPlan) -> Result<()> {
        for task in plan.tasks() {
            if !self.backends.workers.supports(task.agent) {
                return Err(Error::AgentNotAvailable(task.agent));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("workers", &self.backends.workers)
            .field("decomposer", &self.decomposer.is_some())
            .finish()
    }
}

fn final_output(
    run_id: RunId,
    final_response: Value,
    report: SchedulerReport,
    synthesis_trail: Vec<ValidationRecord>,
) -> FinalOutput {
    FinalOutput {
        run_id,
        final_response,
        per_task_results: report.plan.snapshot().results(),
        failed_tasks: report.failures.iter().map(|f| f.task_id.clone()).collect(),
        blocked_tasks: report.blocked.iter().map(|b| b.task_id.clone()).collect(),
        failures: report.failures,
        blocked: report.blocked,
        canceled_tasks: report.canceled,
        validations: report.validations.into_records(),
        synthesis_trail,
    }
}

fn failure_report(
    run_id: RunId,
    reason: String,
    report: SchedulerReport,
    synthesis_trail: Vec<ValidationRecord>,
) -> FailureReport {
    FailureReport {
        run_id,
        reason,
        partial_results: report.plan.snapshot().results(),
        failed_tasks: report.failures.iter().map(|f| f.task_id.clone()).collect(),
        blocked_tasks: report.blocked.iter().map(|b| b.task_id.clone()).collect(),
        failures: report.failures,
        blocked: report.blocked,
        canceled_tasks: report.canceled,
        validations: report.validations.into_records(),
        synthesis_trail,
    }
}
