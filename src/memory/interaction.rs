//! Interaction records: the entries of a memory window.

use crate::core::task::AgentKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A specialized worker of the given kind.
    Worker(AgentKind),
    Validator,
    Synthesizer,
    /// The engine itself (notes about failed calls and similar bookkeeping).
    Engine,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Worker(kind) => write!(f, "{}", kind),
            Role::Validator => write!(f, "validator"),
            Role::Synthesizer => write!(f, "synthesizer"),
            Role::Engine => write!(f, "engine"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// One reasoning step (thought/action/observation).
    Step,
    /// Validator feedback rejecting an attempt.
    Feedback,
    /// The raw result an attempt produced.
    Result,
    /// Free-form bookkeeping.
    Note,
}

/// One record in a memory window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub role: Role,
    pub kind: InteractionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    /// Attempt number a feedback or result record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl Interaction {
    fn bare(role: Role, kind: InteractionKind) -> Self {
        Self {
            role,
            kind,
            thought: None,
            action: None,
            action_input: None,
            observation: None,
            attempt: None,
            timestamp: Utc::now(),
        }
    }

    /// A reasoning step reported by a worker.
    pub fn step(role: Role, thought: &str, action: &str, observation: &str) -> Self {
        Self {
            thought: Some(thought.to_string()),
            action: Some(action.to_string()),
            observation: Some(observation.to_string()),
            ..Self::bare(role, InteractionKind::Step)
        }
    }

    pub fn with_action_input(mut self, input: Value) -> Self {
        self.action_input = Some(input);
        self
    }

    /// Validator feedback that rejected the given attempt.
    pub fn feedback(attempt: u32, feedback: &str) -> Self {
        Self {
            observation: Some(feedback.to_string()),
            attempt: Some(attempt),
            ..Self::bare(Role::Validator, InteractionKind::Feedback)
        }
    }

    /// The raw result of an attempt, before validation.
    pub fn result(role: Role, attempt: u32, result: &Value) -> Self {
        Self {
            observation: Some(value_text(result)),
            action_input: Some(result.clone()),
            attempt: Some(attempt),
            ..Self::bare(role, InteractionKind::Result)
        }
    }

    pub fn note(role: Role, text: &str) -> Self {
        Self {
            observation: Some(text.to_string()),
            ..Self::bare(role, InteractionKind::Note)
        }
    }

    /// Single-line rendering used when assembling prompt context.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if let Some(thought) = &self.thought {
            parts.push(format!("thought: {}", thought));
        }
        if let Some(action) = &self.action {
            parts.push(format!("action: {}", action));
        }
        if self.kind != InteractionKind::Result {
            if let Some(input) = &self.action_input {
                parts.push(format!("input: {}", input));
            }
        }
        if let Some(observation) = &self.observation {
            parts.push(format!("observation: {}", observation));
        }
        let label = match (self.kind, self.attempt) {
            (InteractionKind::Feedback, Some(n)) => format!("feedback on attempt {}", n),
            (InteractionKind::Result, Some(n)) => format!("result of attempt {}", n),
            (InteractionKind::Step, _) => "step".to_string(),
            (InteractionKind::Note, _) => "note".to_string(),
            (InteractionKind::Feedback, None) => "feedback".to_string(),
            (InteractionKind::Result, None) => "result".to_string(),
        };
        format!("[{}] {}: {}", self.role, label, parts.join("; "))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
