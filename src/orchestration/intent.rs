//! Pre-call intent step.
//!
//! Before every reasoning call (worker, validator, synthesizer) the engine
//! asks the intent classifier whether the call needs context it would not
//! otherwise get. The answer only shapes the context handed to that one
//! call; it is never written into a memory window.

use crate::backend::IntentClassifier;
use crate::core::task::TaskId;
use crate::error::InvocationError;
use crate::memory::{Interaction, MemoryStore, ScopedContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Extra context an invocation asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextRequest {
    /// The window of a task outside the invocation's scope.
    DependencyWindow(TaskId),
    /// A tool or capability the call should be told about.
    Capability(String),
    /// The task's own summary, asked for explicitly.
    Summary,
}

pub struct IntentStep {
    classifier: Arc<dyn IntentClassifier>,
    /// How many recent records the classifier sees.
    window: usize,
    timeout: Duration,
}

impl IntentStep {
    pub fn new(classifier: Arc<dyn IntentClassifier>, window: usize, timeout: Duration) -> Self {
        Self {
            classifier,
            window,
            timeout,
        }
    }

    /// Ask the classifier. Errors and timeouts mean "nothing extra".
    pub async fn consult(
        &self,
        recent: &[Interaction],
        summary: Option<&str>,
    ) -> Option<ContextRequest> {
        let start = recent.len().saturating_sub(self.window);
        let outcome = tokio::time::timeout(
            self.timeout,
            self.classifier.needs_more_context(&recent[start..], summary),
        )
        .await
        .unwrap_or(Err(InvocationError::Timeout(self.timeout)));

        match outcome {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "intent step failed, using scoped context only");
                None
            }
        }
    }

    /// Run the intent step for a task invocation and apply its answer.
    pub async fn augment(&self, store: &MemoryStore, context: &mut ScopedContext) {
        let request = self
            .consult(context.recent(self.window), context.own.summary.as_deref())
            .await;
        if let Some(request) = request {
            resolve(store, context, request).await;
        }
    }
}

impl std::fmt::Debug for IntentStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentStep")
            .field("window", &self.window)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Apply one request to a scoped context.
///
/// A foreign window is only granted once sealed, so an invocation never
/// observes a window its owner is still writing.
pub async fn resolve(store: &MemoryStore, context: &mut ScopedContext, request: ContextRequest) {
    match request {
        ContextRequest::DependencyWindow(id) => {
            if context.sees(&id) {
                debug!(task = %context.task_id, requested = %id, "window already in scope");
                return;
            }
            match store.sealed_view(&id).await {
                Some(view) => {
                    debug!(task = %context.task_id, granted = %id, "extra window granted");
                    context.extra.push(view);
                }
                None => {
                    debug!(task = %context.task_id, requested = %id, "window not sealed, request dropped");
                }
            }
        }
        ContextRequest::Capability(name) => {
            if !context.capabilities.contains(&name) {
                context.capabilities.push(name);
            }
        }
        ContextRequest::Summary => {
            if context.own.summary.is_none() {
                debug!(task = %context.task_id, "summary requested but none exists yet");
            }
        }
    }
}
