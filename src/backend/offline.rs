//! Offline backend used by `tessera simulate`.
//!
//! No model is called: workers echo their task together with what they can
//! see, the validator rejects a configured set of tasks, and summaries and
//! the final response are plain concatenations.

use crate::backend::{
    Assessment, IntentClassifier, InvocationResult, Summarizer, Synthesizer, Validator, Worker,
    WorkerOutput, WorkerRegistry,
};
use crate::core::task::{AgentKind, TaskId};
use crate::engine::Backends;
use crate::memory::{GlobalHistory, Interaction, Role, ScopedContext};
use crate::orchestration::intent::ContextRequest;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Echoes the task description and the ids of every window in scope.
#[derive(Debug, Default)]
pub struct EchoWorker;

#[async_trait]
impl Worker for EchoWorker {
    async fn invoke(
        &self,
        agent: AgentKind,
        context: &ScopedContext,
        description: &str,
    ) -> InvocationResult<WorkerOutput> {
        let inputs: Vec<String> = context
            .dependencies
            .iter()
            .chain(&context.extra)
            .map(|w| w.task_id.to_string())
            .collect();
        let step = Interaction::step(
            Role::Worker(agent),
            &format!("working on: {}", description),
            "echo",
            &format!("{} dependency window(s) in scope", inputs.len()),
        );
        Ok(WorkerOutput::new(json!({
            "task_id": context.task_id,
            "agent": agent,
            "answer": format!("[{}] {}", agent, description),
            "inputs": inputs,
        }))
        .with_steps(vec![step]))
    }
}

/// Passes everything except results produced for the listed tasks.
#[derive(Debug, Default)]
pub struct KeywordValidator {
    reject: HashSet<TaskId>,
}

impl KeywordValidator {
    pub fn rejecting(ids: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            reject: ids.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Validator for KeywordValidator {
    async fn validate(
        &self,
        result: &Value,
        _requirements: &str,
        context: &ScopedContext,
    ) -> InvocationResult<Assessment> {
        if self.reject.contains(&context.task_id) {
            return Ok(Assessment::fail(format!(
                "task {} is configured to fail validation",
                context.task_id
            )));
        }
        if result.is_null() {
            return Ok(Assessment::fail("empty result"));
        }
        Ok(Assessment::pass("validated"))
    }
}

/// Joins evicted records onto the existing summary.
#[derive(Debug, Default)]
pub struct ConcatSummarizer;

#[async_trait]
impl Summarizer for ConcatSummarizer {
    async fn summarize(
        &self,
        existing_summary: Option<&str>,
        evicted: &[Interaction],
    ) -> InvocationResult<String> {
        let mut parts: Vec<String> = existing_summary.map(str::to_string).into_iter().collect();
        parts.extend(evicted.iter().map(Interaction::render));
        Ok(parts.join(" | "))
    }
}

/// Never asks for extra context.
#[derive(Debug, Default)]
pub struct NoIntent;

#[async_trait]
impl IntentClassifier for NoIntent {
    async fn needs_more_context(
        &self,
        _recent: &[Interaction],
        _summary: Option<&str>,
    ) -> InvocationResult<Option<ContextRequest>> {
        Ok(None)
    }
}

/// Lists every validated answer in plan order.
#[derive(Debug, Default)]
pub struct ConcatSynthesizer;

#[async_trait]
impl Synthesizer for ConcatSynthesizer {
    async fn synthesize(
        &self,
        history: &GlobalHistory,
        _scratch: &ScopedContext,
    ) -> InvocationResult<Value> {
        let lines: Vec<String> = history
            .results
            .iter()
            .map(|r| {
                let answer = r
                    .result
                    .get("answer")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| r.result.to_string());
                format!("{}: {}", r.task_id, answer)
            })
            .collect();
        Ok(Value::String(lines.join("\n")))
    }
}

/// The full offline backend set. Tasks in `failing` always fail validation.
pub fn backends(failing: impl IntoIterator<Item = TaskId>) -> Backends {
    Backends {
        workers: WorkerRegistry::new().with_all(Arc::new(EchoWorker)),
        validator: Arc::new(KeywordValidator::rejecting(failing)),
        summarizer: Arc::new(ConcatSummarizer),
        intent: Arc::new(NoIntent),
        synthesizer: Arc::new(ConcatSynthesizer),
    }
}
