//! Validation records and the append-only log that keeps them.

use crate::backend::Verdict;
use crate::core::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a validation record is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Subject {
    Task(TaskId),
    Synthesis,
}

impl Subject {
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Subject::Task(id) => Some(id),
            Subject::Synthesis => None,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Task(id) => write!(f, "task {}", id),
            Subject::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// Outcome of checking one attempt. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub subject: Subject,
    pub attempt: u32,
    pub verdict: Verdict,
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
}

impl ValidationRecord {
    pub fn new(subject: Subject, attempt: u32, verdict: Verdict, feedback: &str) -> Self {
        Self {
            subject,
            attempt,
            verdict,
            feedback: feedback.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

impl std::fmt::Display for ValidationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verdict = match self.verdict {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
        };
        write!(
            f,
            "[{}] {} attempt {}: {}",
            verdict, self.subject, self.attempt, self.feedback
        )
    }
}

/// Append-only list of validation records.
#[derive(Debug, Clone, Default)]
pub struct ValidationLog {
    records: Vec<ValidationRecord>,
}

impl ValidationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ValidationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ValidationRecord] {
        &self.records
    }

    pub fn for_task<'a>(&'a self, task_id: &'a TaskId) -> impl Iterator<Item = &'a ValidationRecord> {
        self.records
            .iter()
            .filter(move |r| r.subject.task_id() == Some(task_id))
    }

    /// Feedback of every failed attempt for a task, oldest first.
    pub fn feedback_trail(&self, task_id: &TaskId) -> Vec<String> {
        self.for_task(task_id)
            .filter(|r| !r.passed())
            .map(|r| r.feedback.clone())
            .collect()
    }

    pub fn into_records(self) -> Vec<ValidationRecord> {
        self.records
    }
}
