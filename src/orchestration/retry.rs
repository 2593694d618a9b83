//! Validate/retry state machine.
//!
//! One `AttemptState` value drives a task (or the synthesis stage) from its
//! first attempt to a terminal state:
//!
//! ```text
//! Running -> AwaitingValidation -> Done
//!    ^               |
//!    |               +-> Retrying --Resume--> Running
//!    |               +-> Failed
//!    +-- worker error/timeout -> Retrying | Failed
//! ```
//!
//! Every non-terminal state also accepts `Cancel`.

use crate::core::task::TaskStatus;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default maximum number of retries before giving up on a task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry bound for one task or for synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-invocations allowed after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Whether another attempt may follow a rejected `attempt` (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt.saturating_sub(1) < self.max_retries
    }

    /// Total invocations the policy permits.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Running { attempt: u32 },
    AwaitingValidation { attempt: u32 },
    Retrying { attempt: u32, feedback: String },
    Done { attempt: u32 },
    Failed { reason: String },
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEvent {
    /// The worker produced a result.
    Produced,
    /// The worker call errored or timed out.
    InvocationFailed(String),
    Passed,
    Rejected(String),
    /// The validator call itself errored or timed out.
    ValidatorFailed(String),
    /// Feedback recorded; start the next attempt.
    Resume,
    /// Give up without another attempt (a timed-out synthesizer call).
    Abort(String),
    Cancel,
}

impl AttemptEvent {
    fn name(&self) -> &'static str {
        match self {
            AttemptEvent::Produced => "produced",
            AttemptEvent::InvocationFailed(_) => "invocation_failed",
            AttemptEvent::Passed => "passed",
            AttemptEvent::Rejected(_) => "rejected",
            AttemptEvent::ValidatorFailed(_) => "validator_failed",
            AttemptEvent::Resume => "resume",
            AttemptEvent::Abort(_) => "abort",
            AttemptEvent::Cancel => "cancel",
        }
    }
}

impl AttemptState {
    pub fn start() -> Self {
        AttemptState::Running { attempt: 1 }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttemptState::Running { .. } => "running",
            AttemptState::AwaitingValidation { .. } => "awaiting_validation",
            AttemptState::Retrying { .. } => "retrying",
            AttemptState::Done { .. } => "done",
            AttemptState::Failed { .. } => "failed",
            AttemptState::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Done { .. } | AttemptState::Failed { .. } | AttemptState::Canceled
        )
    }

    /// The attempt number this state belongs to, if any.
    pub fn attempt(&self) -> Option<u32> {
        match self {
            AttemptState::Running { attempt }
            | AttemptState::AwaitingValidation { attempt }
            | AttemptState::Retrying { attempt, .. }
            | AttemptState::Done { attempt } => Some(*attempt),
            AttemptState::Failed { .. } | AttemptState::Canceled => None,
        }
    }

    /// Apply an event. Illegal combinations return `Error::InvalidTransition`.
    pub fn next(self, event: AttemptEvent, policy: &RetryPolicy) -> Result<AttemptState> {
        let next = match (&self, event) {
            (s, AttemptEvent::Cancel) if !s.is_terminal() => AttemptState::Canceled,
            (s, AttemptEvent::Abort(reason)) if !s.is_terminal() => AttemptState::Failed { reason },

            (AttemptState::Running { attempt }, AttemptEvent::Produced) => {
                AttemptState::AwaitingValidation { attempt: *attempt }
            }
            (AttemptState::Running { attempt }, AttemptEvent::InvocationFailed(reason)) => {
                reject(*attempt, reason, policy)
            }
            (AttemptState::AwaitingValidation { attempt }, AttemptEvent::Passed) => {
                AttemptState::Done { attempt: *attempt }
            }
            (AttemptState::AwaitingValidation { attempt }, AttemptEvent::Rejected(feedback)) => {
                reject(*attempt, feedback, policy)
            }
            (AttemptState::AwaitingValidation { .. }, AttemptEvent::ValidatorFailed(reason)) => {
                AttemptState::Failed {
                    reason: format!("validator failed: {}", reason),
                }
            }
            (AttemptState::Retrying { attempt, .. }, AttemptEvent::Resume) => {
                AttemptState::Running {
                    attempt: attempt + 1,
                }
            }
            (_, event) => {
                return Err(Error::InvalidTransition {
                    from: self.name().to_string(),
                    to: event.name().to_string(),
                })
            }
        };
        Ok(next)
    }

    /// The task status this state shows up as in the plan.
    pub fn task_status(&self) -> TaskStatus {
        match self {
            AttemptState::Running { .. } => TaskStatus::Running,
            AttemptState::AwaitingValidation { .. } => TaskStatus::AwaitingValidation,
            AttemptState::Retrying { .. } => TaskStatus::Retrying,
            AttemptState::Done { .. } => TaskStatus::Done,
            AttemptState::Failed { reason } => TaskStatus::Failed {
                error: reason.clone(),
            },
            AttemptState::Canceled => TaskStatus::Canceled,
        }
    }
}

fn reject(attempt: u32, feedback: String, policy: &RetryPolicy) -> AttemptState {
    if policy.allows_retry_after(attempt) {
        AttemptState::Retrying { attempt, feedback }
    } else {
        AttemptState::Failed {
            reason: format!(
                "retries exhausted after {} attempts: {}",
                attempt, feedback
            ),
        }
    }
}
