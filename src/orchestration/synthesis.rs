//! Synthesis stage: the final response over the whole run.
//!
//! Runs once the plan is fully resolved. Drafts go through the same
//! validate/retry state machine as tasks, with an independent retry bound.
//! Drafts and feedback live in a private window that is never summarized
//! and never shown to workers.

use crate::backend::{Synthesizer, Validator, Verdict};
use crate::core::task::TaskId;
use crate::error::InvocationError;
use crate::memory::{GlobalHistory, Interaction, MemoryWindow, Role, ScopedContext};
use crate::orchestration::intent::{ContextRequest, IntentStep};
use crate::orchestration::retry::{AttemptEvent, AttemptState, RetryPolicy};
use crate::orchestration::scheduler::{emit_event, EngineEvent};
use crate::orchestration::validation::{Subject, ValidationRecord};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Id of the synthesis stage's private window.
pub const SYNTHESIS_WINDOW: &str = "synthesis";

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    Completed {
        response: Value,
        trail: Vec<ValidationRecord>,
    },
    Failed {
        reason: String,
        trail: Vec<ValidationRecord>,
    },
    Canceled {
        trail: Vec<ValidationRecord>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesisTimeouts {
    pub synthesizer: Duration,
    pub validator: Duration,
}

pub struct SynthesisStage {
    synthesizer: Arc<dyn Synthesizer>,
    validator: Arc<dyn Validator>,
    intent: Arc<IntentStep>,
    policy: RetryPolicy,
    timeouts: SynthesisTimeouts,
}

impl SynthesisStage {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        validator: Arc<dyn Validator>,
        intent: Arc<IntentStep>,
        policy: RetryPolicy,
        timeouts: SynthesisTimeouts,
    ) -> Self {
        Self {
            synthesizer,
            validator,
            intent,
            policy,
            timeouts,
        }
    }

    /// Draft, validate and retry until a draft passes or the bound is hit.
    ///
    /// A timed-out synthesizer or any validator error ends the stage
    /// without another attempt. Failed synthesizer calls are kept in the
    /// trail as Fail records next to the validator's verdicts.
    pub async fn run(
        &self,
        history: &GlobalHistory,
        requirements: &str,
        token: &CancellationToken,
        event_tx: Option<&mpsc::Sender<EngineEvent>>,
    ) -> SynthesisOutcome {
        let mut scratch = MemoryWindow::new(TaskId::from(SYNTHESIS_WINDOW));
        let mut state = AttemptState::start();
        let mut draft: Option<Value> = None;
        let mut trail: Vec<ValidationRecord> = Vec::new();

        info!(
            windows = history.windows.len(),
            max_retries = self.policy.max_retries,
            "synthesis started"
        );

        loop {
            if token.is_cancelled() && !state.is_terminal() {
                info!(state = state.name(), "synthesis canceled");
                state = self.advance(state, AttemptEvent::Cancel);
            }

            let event = match &state {
                AttemptState::Running { attempt } => {
                    emit_event(event_tx, EngineEvent::SynthesisStarted { attempt: *attempt });
                    let (event, produced) = self.draft(history, &mut scratch, *attempt).await;
                    if let AttemptEvent::InvocationFailed(reason) | AttemptEvent::Abort(reason) =
                        &event
                    {
                        trail.push(ValidationRecord::new(
                            Subject::Synthesis,
                            *attempt,
                            Verdict::Fail,
                            reason,
                        ));
                    }
                    draft = produced;
                    event
                }
                AttemptState::AwaitingValidation { attempt } => {
                    let candidate = draft.clone().unwrap_or(Value::Null);
                    let (event, record) = self
                        .check(history, &scratch, requirements, *attempt, &candidate)
                        .await;
                    trail.extend(record);
                    event
                }
                AttemptState::Retrying { attempt, feedback } => {
                    scratch.push(Interaction::feedback(*attempt, feedback));
                    AttemptEvent::Resume
                }
                AttemptState::Done { .. }
                | AttemptState::Failed { .. }
                | AttemptState::Canceled => break,
            };

            state = self.advance(state, event);
        }

        match state {
            AttemptState::Done { attempt } => {
                info!(attempt, "synthesis validated");
                SynthesisOutcome::Completed {
                    response: draft.unwrap_or(Value::Null),
                    trail,
                }
            }
            AttemptState::Failed { reason } => {
                error!(reason = %reason, "synthesis failed");
                SynthesisOutcome::Failed { reason, trail }
            }
            _ => SynthesisOutcome::Canceled { trail },
        }
    }

    fn advance(&self, state: AttemptState, event: AttemptEvent) -> AttemptState {
        match state.next(event, &self.policy) {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "illegal synthesis transition");
                AttemptState::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn draft(
        &self,
        history: &GlobalHistory,
        scratch: &mut MemoryWindow,
        attempt: u32,
    ) -> (AttemptEvent, Option<Value>) {
        let mut context = ScopedContext::new(scratch.view(), Vec::new());
        self.apply_intent(&mut context, scratch).await;

        let timeout = self.timeouts.synthesizer;
        let outcome = tokio::time::timeout(timeout, self.synthesizer.synthesize(history, &context))
            .await
            .unwrap_or(Err(InvocationError::Timeout(timeout)));

        match outcome {
            Ok(response) => {
                scratch.push(Interaction::result(Role::Synthesizer, attempt, &response));
                (AttemptEvent::Produced, Some(response))
            }
            Err(e) if e.is_timeout() => {
                error!(attempt, error = %e, "synthesizer timed out");
                (
                    AttemptEvent::Abort(format!("synthesizer invocation failed: {}", e)),
                    None,
                )
            }
            Err(e) => {
                warn!(attempt, error = %e, "synthesizer invocation failed");
                (
                    AttemptEvent::InvocationFailed(format!("synthesizer invocation failed: {}", e)),
                    None,
                )
            }
        }
    }

    async fn check(
        &self,
        history: &GlobalHistory,
        scratch: &MemoryWindow,
        requirements: &str,
        attempt: u32,
        candidate: &Value,
    ) -> (AttemptEvent, Option<ValidationRecord>) {
        let mut context = ScopedContext::new(scratch.view(), history.windows.clone());
        self.apply_intent(&mut context, scratch).await;

        let timeout = self.timeouts.validator;
        let outcome = tokio::time::timeout(
            timeout,
            self.validator.validate(candidate, requirements, &context),
        )
        .await
        .unwrap_or(Err(InvocationError::Timeout(timeout)));

        match outcome {
            Ok(assessment) => {
                info!(
                    attempt,
                    verdict = ?assessment.verdict,
                    feedback = %assessment.feedback,
                    "synthesis verdict"
                );
                let record = ValidationRecord::new(
                    Subject::Synthesis,
                    attempt,
                    assessment.verdict,
                    &assessment.feedback,
                );
                let event = match assessment.verdict {
                    Verdict::Pass => AttemptEvent::Passed,
                    Verdict::Fail => AttemptEvent::Rejected(assessment.feedback),
                };
                (event, Some(record))
            }
            Err(e) => {
                error!(attempt, error = %e, "synthesis validator invocation failed");
                (AttemptEvent::ValidatorFailed(e.to_string()), None)
            }
        }
    }

    /// Synthesis already sees every window, so only capability notes apply.
    async fn apply_intent(&self, context: &mut ScopedContext, scratch: &MemoryWindow) {
        match self.intent.consult(scratch.records(), None).await {
            Some(ContextRequest::Capability(name)) => {
                if !context.capabilities.contains(&name) {
                    context.capabilities.push(name);
                }
            }
            Some(other) => debug!(request = ?other, "intent request ignored for synthesis"),
            None => {}
        }
    }
}

impl std::fmt::Debug for SynthesisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisStage")
            .field("policy", &self.policy)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}
