//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted backends that count calls and record what they were shown
//! - Predefined plans (chain, diamond, fan-in)
//! - An engine config with small bounds

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tessera::backend::{
    Assessment, IntentClassifier, InvocationResult, Summarizer, Synthesizer, Validator, Worker,
    WorkerOutput, WorkerRegistry,
};
use tessera::core::{AgentKind, ExecutionPlan, TaskDescriptor, TaskId};
use tessera::memory::{GlobalHistory, Interaction, Role, ScopedContext, WindowView};
use tessera::orchestration::ContextRequest;
use tessera::{Backends, EngineConfig};

/// Id the synthesis stage's context carries.
pub const SYNTHESIS: &str = "synthesis";

// ========== Worker ==========

/// What one worker invocation was shown.
#[derive(Debug, Clone)]
pub struct SeenContext {
    pub task_id: TaskId,
    pub visible: Vec<TaskId>,
    /// Sealed flag of every dependency window, in order.
    pub dependencies_sealed: Vec<bool>,
    pub own_records: usize,
    pub own_summary: Option<String>,
    pub capabilities: Vec<String>,
}

/// Worker that records every call and tracks concurrency.
#[derive(Default)]
pub struct ScriptedWorker {
    /// Simulated work time per invocation.
    pub delay: Duration,
    /// Extra reasoning steps returned with every result.
    pub steps: usize,
    /// Tasks whose invocation returns a transport error.
    pub erroring: HashSet<TaskId>,
    /// Tasks whose invocation panics.
    pub panicking: HashSet<TaskId>,
    calls: Mutex<Vec<SeenContext>>,
    /// "start:<id>" and "end:<id>" entries in the order they happened.
    timeline: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn erroring(mut self, id: &str) -> Self {
        self.erroring.insert(TaskId::from(id));
        self
    }

    pub fn panicking(mut self, id: &str) -> Self {
        self.panicking.insert(TaskId::from(id));
        self
    }

    pub fn calls(&self) -> Vec<SeenContext> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: &str) -> Vec<SeenContext> {
        self.calls()
            .into_iter()
            .filter(|c| c.task_id.as_str() == id)
            .collect()
    }

    pub fn invocations(&self, id: &str) -> usize {
        self.calls_for(id).len()
    }

    pub fn total_invocations(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn timeline(&self) -> Vec<String> {
        self.timeline.lock().unwrap().clone()
    }

    /// Position of an entry in the timeline.
    pub fn at(&self, entry: &str) -> Option<usize> {
        self.timeline().iter().position(|e| e == entry)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn invoke(
        &self,
        agent: AgentKind,
        context: &ScopedContext,
        description: &str,
    ) -> InvocationResult<WorkerOutput> {
        let id = context.task_id.clone();
        self.calls.lock().unwrap().push(SeenContext {
            task_id: id.clone(),
            visible: context.visible_tasks(),
            dependencies_sealed: context.dependencies.iter().map(|w| w.sealed).collect(),
            own_records: context.own.records.len(),
            own_summary: context.own.summary.clone(),
            capabilities: context.capabilities.clone(),
        });
        self.timeline.lock().unwrap().push(format!("start:{}", id));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.timeline.lock().unwrap().push(format!("end:{}", id));

        if self.panicking.contains(&id) {
            panic!("worker for {} crashed", id);
        }
        if self.erroring.contains(&id) {
            return Err(tessera::InvocationError::transport("connection reset"));
        }

        let steps = (0..self.steps)
            .map(|n| {
                Interaction::step(
                    Role::Worker(agent),
                    &format!("step {} of {}", n + 1, description),
                    "think",
                    "ok",
                )
            })
            .collect();
        Ok(WorkerOutput::new(json!({ "task": id, "answer": description })).with_steps(steps))
    }
}

// ========== Validator ==========

/// Validator with per-subject scripts.
///
/// Subjects listed in `always_fail` are always rejected; subjects in
/// `fail_first` are rejected that many times and then pass. Everything else
/// passes. Subjects in `delays` answer only after that long.
#[derive(Default)]
pub struct ScriptedValidator {
    always_fail: HashSet<TaskId>,
    fail_first: Mutex<HashMap<TaskId, usize>>,
    delays: HashMap<TaskId, Duration>,
    calls: Mutex<Vec<TaskId>>,
}

impl ScriptedValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_failing(mut self, id: &str) -> Self {
        self.always_fail.insert(TaskId::from(id));
        self
    }

    pub fn failing_first(self, id: &str, times: usize) -> Self {
        self.fail_first
            .lock()
            .unwrap()
            .insert(TaskId::from(id), times);
        self
    }

    pub fn slow(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(TaskId::from(id), delay);
        self
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == id)
            .count()
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(
        &self,
        _result: &Value,
        _requirements: &str,
        context: &ScopedContext,
    ) -> InvocationResult<Assessment> {
        let id = context.task_id.clone();
        self.calls.lock().unwrap().push(id.clone());

        if let Some(delay) = self.delays.get(&id) {
            tokio::time::sleep(*delay).await;
        }
        if self.always_fail.contains(&id) {
            return Ok(Assessment::fail(format!("{} is still incomplete", id)));
        }
        let mut fail_first = self.fail_first.lock().unwrap();
        if let Some(left) = fail_first.get_mut(&id) {
            if *left > 0 {
                *left -= 1;
                return Ok(Assessment::fail(format!("{} needs another pass", id)));
            }
        }
        Ok(Assessment::pass("looks complete"))
    }
}

// ========== Summarizer / Intent / Synthesizer ==========

/// Summarizer that counts calls and joins records.
#[derive(Default)]
pub struct CountingSummarizer {
    calls: AtomicUsize,
    pub failing: bool,
}

impl CountingSummarizer {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(
        &self,
        existing_summary: Option<&str>,
        evicted: &[Interaction],
    ) -> InvocationResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(tessera::InvocationError::transport("summarizer offline"));
        }
        Ok(format!(
            "{}+{}",
            existing_summary.unwrap_or("summary"),
            evicted.len()
        ))
    }
}

/// Intent classifier that answers every call with the same request.
pub struct FixedIntent(pub Option<ContextRequest>);

#[async_trait]
impl IntentClassifier for FixedIntent {
    async fn needs_more_context(
        &self,
        _recent: &[Interaction],
        _summary: Option<&str>,
    ) -> InvocationResult<Option<ContextRequest>> {
        Ok(self.0.clone())
    }
}

/// Synthesizer that records the history and scratch it was given.
#[derive(Default)]
pub struct RecordingSynthesizer {
    /// Time taken by every draft.
    pub delay: Duration,
    /// Every draft returns a transport error.
    pub erroring: bool,
    histories: Mutex<Vec<Vec<WindowView>>>,
    results_seen: Mutex<Vec<usize>>,
    scratch_records: Mutex<Vec<usize>>,
}

impl RecordingSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn erroring(mut self) -> Self {
        self.erroring = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.histories.lock().unwrap().len()
    }

    pub fn windows_seen(&self) -> Vec<Vec<WindowView>> {
        self.histories.lock().unwrap().clone()
    }

    pub fn results_seen(&self) -> Vec<usize> {
        self.results_seen.lock().unwrap().clone()
    }

    pub fn scratch_records(&self) -> Vec<usize> {
        self.scratch_records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(
        &self,
        history: &GlobalHistory,
        scratch: &ScopedContext,
    ) -> InvocationResult<Value> {
        self.histories.lock().unwrap().push(history.windows.clone());
        self.results_seen.lock().unwrap().push(history.results.len());
        self.scratch_records
            .lock()
            .unwrap()
            .push(scratch.own.records.len());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.erroring {
            return Err(tessera::InvocationError::transport("synthesizer unreachable"));
        }
        Ok(json!({ "answer": format!("{} results combined", history.results.len()) }))
    }
}

// ========== Harness ==========

/// All scripted backends, kept so tests can inspect them after a run.
pub struct Harness {
    pub worker: Arc<ScriptedWorker>,
    pub validator: Arc<ScriptedValidator>,
    pub summarizer: Arc<CountingSummarizer>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub intent: Option<ContextRequest>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            worker: Arc::new(ScriptedWorker::new()),
            validator: Arc::new(ScriptedValidator::new()),
            summarizer: Arc::new(CountingSummarizer::default()),
            synthesizer: Arc::new(RecordingSynthesizer::default()),
            intent: None,
        }
    }

    pub fn worker(mut self, worker: ScriptedWorker) -> Self {
        self.worker = Arc::new(worker);
        self
    }

    pub fn validator(mut self, validator: ScriptedValidator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn summarizer(mut self, summarizer: CountingSummarizer) -> Self {
        self.summarizer = Arc::new(summarizer);
        self
    }

    pub fn synthesizer(mut self, synthesizer: RecordingSynthesizer) -> Self {
        self.synthesizer = Arc::new(synthesizer);
        self
    }

    pub fn intent(mut self, request: ContextRequest) -> Self {
        self.intent = Some(request);
        self
    }

    /// Backends with the scripted worker registered for every agent kind.
    pub fn backends(&self) -> Backends {
        let worker: Arc<dyn Worker> = self.worker.clone();
        self.backends_with(WorkerRegistry::new().with_all(worker))
    }

    pub fn backends_with(&self, workers: WorkerRegistry) -> Backends {
        Backends {
            workers,
            validator: self.validator.clone(),
            summarizer: self.summarizer.clone(),
            intent: Arc::new(FixedIntent(self.intent.clone())),
            synthesizer: self.synthesizer.clone(),
        }
    }
}

/// Config with the given concurrency and retry bound, defaults otherwise.
pub fn config(max_concurrency: usize, max_retries: u32) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.max_concurrency = max_concurrency;
    config.max_retries = max_retries;
    config
}

// ========== Plans ==========

pub fn task(id: &str, deps: &[&str]) -> TaskDescriptor {
    TaskDescriptor::new(id, &format!("task {}", id), AgentKind::Research, deps)
}

pub fn plan(descriptors: &[TaskDescriptor]) -> ExecutionPlan {
    ExecutionPlan::build(descriptors).expect("fixture plan should be valid")
}

/// 1 -> 2 -> 3
pub fn chain_plan() -> ExecutionPlan {
    plan(&[task("1", &[]), task("2", &["1"]), task("3", &["2"])])
}

/// 1 -> {2, 3} -> 4
pub fn diamond_plan() -> ExecutionPlan {
    plan(&[
        task("1", &[]),
        task("2", &["1"]),
        task("3", &["1"]),
        task("4", &["2", "3"]),
    ])
}

/// {1, 2} -> 3
pub fn fan_in_plan() -> ExecutionPlan {
    plan(&[task("1", &[]), task("2", &[]), task("3", &["1", "2"])])
}

pub fn ids(list: &[&str]) -> Vec<TaskId> {
    list.iter().map(|s| TaskId::from(*s)).collect()
}
