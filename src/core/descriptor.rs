//! Decomposition input: the task list a planning step hands to the engine.
//!
//! Descriptors usually come straight out of a model response, so parsing is
//! lenient about framing (fenced blocks, wrapper objects, numeric ids) and
//! strict about content.

use crate::core::task::{AgentKind, TaskId};
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// Matches the first fenced code block, with or without a `json` tag.
static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

/// Keys under which a wrapper object may carry the task array.
const WRAPPER_KEYS: [&str; 2] = ["decomposed_tasks", "tasks"];

/// One decomposed task, as produced by the decomposition step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(alias = "task_id", deserialize_with = "de_task_id")]
    pub id: TaskId,
    #[serde(alias = "description")]
    pub task: String,
    #[serde(alias = "agent_kind", default = "default_agent")]
    pub agent: AgentKind,
    #[serde(default, alias = "deps", deserialize_with = "de_task_ids")]
    pub dependencies: Vec<TaskId>,
}

impl TaskDescriptor {
    pub fn new(id: impl Into<TaskId>, task: &str, agent: AgentKind, dependencies: &[&str]) -> Self {
        Self {
            id: id.into(),
            task: task.to_string(),
            agent,
            dependencies: dependencies.iter().map(|d| TaskId::from(*d)).collect(),
        }
    }
}

fn default_agent() -> AgentKind {
    AgentKind::General
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl From<RawId> for TaskId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => TaskId::from(s),
            RawId::Number(n) => TaskId::from(n),
        }
    }
}

fn de_task_id<'de, D>(deserializer: D) -> std::result::Result<TaskId, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(TaskId::from)
}

fn de_task_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<TaskId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<RawId>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(TaskId::from)
        .collect())
}

/// Parse a decomposition document into descriptors.
///
/// Accepts a bare array, an object wrapping the array under
/// `decomposed_tasks` or `tasks`, or either form inside a fenced code block
/// embedded in free text.
pub fn parse_descriptors(text: &str) -> Result<Vec<TaskDescriptor>> {
    let body = match FENCED_BLOCK_RE.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
        None => text,
    };

    let value: Value = serde_json::from_str(body.trim())?;
    let tasks = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => WRAPPER_KEYS
            .iter()
            .find_map(|key| map.remove(*key))
            .filter(Value::is_array)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "decomposition object has no task array (expected one of: {})",
                    WRAPPER_KEYS.join(", ")
                ))
            })?,
        other => {
            return Err(Error::Validation(format!(
                "decomposition must be an array or object, got {}",
                json_type(&other)
            )))
        }
    };

    Ok(serde_json::from_value(tasks)?)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
