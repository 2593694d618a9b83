//! A single task's memory window.

use crate::core::task::TaskId;
use crate::memory::interaction::Interaction;
use serde::{Deserialize, Serialize};

/// Ordered interaction log for one task, with an optional rolling summary
/// standing in for evicted records.
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    task_id: TaskId,
    records: Vec<Interaction>,
    summary: Option<String>,
    /// Set once the task reached Done; dependents may read from then on.
    sealed: bool,
}

impl MemoryWindow {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            records: Vec::new(),
            summary: None,
            sealed: false,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn push(&mut self, record: Interaction) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Interaction] {
        &self.records
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn set_summary(&mut self, summary: String) {
        self.summary = Some(summary);
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[Interaction] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    /// Remove and return every record older than the last `retain`.
    pub fn evict_older_than(&mut self, retain: usize) -> Vec<Interaction> {
        let cut = self.records.len().saturating_sub(retain);
        self.records.drain(..cut).collect()
    }

    /// Put evicted records back in front, in their original order.
    pub fn restore(&mut self, mut evicted: Vec<Interaction>) {
        evicted.append(&mut self.records);
        self.records = evicted;
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn view(&self) -> WindowView {
        WindowView {
            task_id: self.task_id.clone(),
            summary: self.summary.clone(),
            records: self.records.clone(),
            sealed: self.sealed,
        }
    }
}

/// Point-in-time copy of a window, handed to invocations and hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowView {
    pub task_id: TaskId,
    pub summary: Option<String>,
    pub records: Vec<Interaction>,
    pub sealed: bool,
}

impl WindowView {
    /// Summary first, then live records.
    pub fn render(&self) -> String {
        let mut out = format!("## task {}\n", self.task_id);
        if let Some(summary) = &self.summary {
            out.push_str(&format!("summary: {}\n", summary));
        }
        for record in &self.records {
            out.push_str(&record.render());
            out.push('\n');
        }
        out
    }
}
