//! The memory store: every task window of one run, behind one API.

use crate::backend::Summarizer;
use crate::core::plan::ExecutionPlan;
use crate::core::task::TaskId;
use crate::error::{Error, InvocationError, Result};
use crate::memory::context::ScopedContext;
use crate::memory::interaction::Interaction;
use crate::memory::window::{MemoryWindow, WindowView};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Window size and summarization settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSettings {
    /// Live records allowed before summarization triggers.
    pub threshold: usize,
    /// Records kept live after a summarization.
    pub retained_tail: usize,
    pub summarizer_timeout: Duration,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            threshold: 10,
            retained_tail: 5,
            summarizer_timeout: Duration::from_secs(60),
        }
    }
}

/// Owns the memory windows for one run.
///
/// `context_for` gives a task its own window plus its direct dependencies'
/// windows; `global_context` gives every window in plan order. Both read the
/// same underlying windows.
pub struct MemoryStore {
    windows: HashMap<TaskId, Arc<RwLock<MemoryWindow>>>,
    /// Task ids in plan order.
    order: Vec<TaskId>,
    dependencies: HashMap<TaskId, Vec<TaskId>>,
    summarizer: Arc<dyn Summarizer>,
    settings: WindowSettings,
}

impl MemoryStore {
    /// One empty window per task in the plan.
    pub fn for_plan(
        plan: &ExecutionPlan,
        summarizer: Arc<dyn Summarizer>,
        settings: WindowSettings,
    ) -> Self {
        let order = plan.task_ids();
        let windows = order
            .iter()
            .map(|id| (id.clone(), Arc::new(RwLock::new(MemoryWindow::new(id.clone())))))
            .collect();
        let dependencies = plan
            .tasks()
            .map(|t| (t.id.clone(), t.dependencies.clone()))
            .collect();
        Self {
            windows,
            order,
            dependencies,
            summarizer,
            settings,
        }
    }

    pub fn settings(&self) -> WindowSettings {
        self.settings
    }

    fn window(&self, task_id: &TaskId) -> Result<&Arc<RwLock<MemoryWindow>>> {
        self.windows
            .get(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.clone()))
    }

    /// Append a record to a task's window, summarizing when the live window
    /// grows past the threshold.
    ///
    /// On summarizer failure the evicted records are put back, so nothing is
    /// lost, and `Error::Summarization` is returned.
    pub async fn append(&self, task_id: &TaskId, interaction: Interaction) -> Result<()> {
        let mut window = self.window(task_id)?.write().await;
        window.push(interaction);
        if window.len() <= self.settings.threshold {
            return Ok(());
        }

        let evicted = window.evict_older_than(self.settings.retained_tail);
        debug!(
            task = %task_id,
            evicted = evicted.len(),
            kept = window.len(),
            "summarizing memory window"
        );

        let timeout = self.settings.summarizer_timeout;
        let outcome = tokio::time::timeout(
            timeout,
            self.summarizer.summarize(window.summary(), &evicted),
        )
        .await
        .unwrap_or(Err(InvocationError::Timeout(timeout)));

        match outcome {
            Ok(summary) => {
                window.set_summary(summary);
                info!(task = %task_id, "memory window summarized");
                Ok(())
            }
            Err(e) => {
                warn!(task = %task_id, error = %e, "summarization failed, keeping records");
                window.restore(evicted);
                Err(Error::Summarization(format!("task {}: {}", task_id, e)))
            }
        }
    }

    /// The task's own window plus its direct dependencies' windows.
    pub async fn context_for(&self, task_id: &TaskId) -> Result<ScopedContext> {
        let own = self.window(task_id)?.read().await.view();
        let mut dependencies = Vec::new();
        for dep in self.dependencies.get(task_id).into_iter().flatten() {
            dependencies.push(self.window(dep)?.read().await.view());
        }
        Ok(ScopedContext::new(own, dependencies))
    }

    /// Every window, in plan order.
    pub async fn global_context(&self) -> Vec<WindowView> {
        let reads = self
            .order
            .iter()
            .filter_map(|id| self.windows.get(id))
            .map(|window| async move { window.read().await.view() });
        join_all(reads).await
    }

    /// Mark a window readable by dependents. Called once its task is Done.
    pub async fn seal(&self, task_id: &TaskId) -> Result<()> {
        self.window(task_id)?.write().await.seal();
        Ok(())
    }

    /// A window's view, only if it has been sealed.
    pub async fn sealed_view(&self, task_id: &TaskId) -> Option<WindowView> {
        let window = self.windows.get(task_id)?.read().await;
        window.is_sealed().then(|| window.view())
    }

    pub async fn view(&self, task_id: &TaskId) -> Result<WindowView> {
        Ok(self.window(task_id)?.read().await.view())
    }

    /// The last `n` records of a window, oldest first.
    pub async fn recent(&self, task_id: &TaskId, n: usize) -> Result<Vec<Interaction>> {
        Ok(self.window(task_id)?.read().await.recent(n).to_vec())
    }

    pub async fn summary(&self, task_id: &TaskId) -> Result<Option<String>> {
        Ok(self
            .window(task_id)?
            .read()
            .await
            .summary()
            .map(str::to_string))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("windows", &self.order.len())
            .field("settings", &self.settings)
            .finish()
    }
}
