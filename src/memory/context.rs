//! Context handed to a single invocation.

use crate::core::task::TaskId;
use crate::memory::interaction::Interaction;
use crate::memory::window::WindowView;
use serde::Serialize;

/// What one invocation is allowed to see: its own window plus the windows of
/// its direct dependencies, and whatever the intent step added on top.
#[derive(Debug, Clone, Serialize)]
pub struct ScopedContext {
    pub task_id: TaskId,
    pub own: WindowView,
    /// Direct dependencies' windows, in the order the task lists them.
    pub dependencies: Vec<WindowView>,
    /// Sealed windows granted by the intent step.
    pub extra: Vec<WindowView>,
    /// Capability notes requested by the intent step.
    pub capabilities: Vec<String>,
}

impl ScopedContext {
    pub fn new(own: WindowView, dependencies: Vec<WindowView>) -> Self {
        Self {
            task_id: own.task_id.clone(),
            own,
            dependencies,
            extra: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    /// Ids of every window visible through this context.
    pub fn visible_tasks(&self) -> Vec<TaskId> {
        std::iter::once(&self.own)
            .chain(&self.dependencies)
            .chain(&self.extra)
            .map(|w| w.task_id.clone())
            .collect()
    }

    pub fn sees(&self, task_id: &TaskId) -> bool {
        self.own.task_id == *task_id
            || self.dependencies.iter().any(|w| w.task_id == *task_id)
            || self.extra.iter().any(|w| w.task_id == *task_id)
    }

    pub fn recent(&self, n: usize) -> &[Interaction] {
        let records = &self.own.records;
        &records[records.len().saturating_sub(n)..]
    }

    pub fn render(&self) -> String {
        let mut out = self.own.render();
        for window in self.dependencies.iter().chain(&self.extra) {
            out.push('\n');
            out.push_str(&window.render());
        }
        if !self.capabilities.is_empty() {
            out.push_str("\n## capabilities\n");
            for capability in &self.capabilities {
                out.push_str(&format!("- {}\n", capability));
            }
        }
        out
    }
}
