//! Read-only view over a whole run, for the synthesis stage.

use crate::core::task::TaskResult;
use crate::memory::window::WindowView;
use crate::orchestration::validation::ValidationRecord;
use serde::Serialize;

/// All task windows and validation records of a run, in plan order.
///
/// Never handed to a specialized worker.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalHistory {
    /// Original request text, when the run started from one.
    pub request: Option<String>,
    pub windows: Vec<WindowView>,
    pub validations: Vec<ValidationRecord>,
    /// Validated results of Done tasks.
    pub results: Vec<TaskResult>,
}

impl GlobalHistory {
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(request) = &self.request {
            out.push_str(&format!("# request\n{}\n\n", request));
        }
        for window in &self.windows {
            out.push_str(&window.render());
            for record in self
                .validations
                .iter()
                .filter(|r| r.subject.task_id() == Some(&window.task_id))
            {
                out.push_str(&format!("{}\n", record));
            }
            out.push('\n');
        }
        out
    }
}
