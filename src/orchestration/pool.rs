//! Bounded pool of in-flight task invocations.
//!
//! The `WorkerPool` enforces the concurrency limit and guarantees that a
//! task id never has two invocations running at once, so each memory window
//! has a single writer.

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use tokio::task::{Id, JoinError, JoinSet};

/// Tracks the spawned runner for each in-flight task.
///
/// Dropping the pool aborts every runner still in it.
pub struct WorkerPool {
    runners: JoinSet<()>,
    /// Runner of each in-flight task.
    in_flight: HashMap<TaskId, Id>,
    /// Reverse of `in_flight`.
    owners: HashMap<Id, TaskId>,
    /// Maximum number of concurrent invocations allowed.
    max_concurrent: usize,
}

impl WorkerPool {
    /// Create a new pool with the given capacity.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            runners: JoinSet::new(),
            in_flight: HashMap::new(),
            owners: HashMap::new(),
            max_concurrent,
        }
    }

    /// Spawn a runner for a task.
    ///
    /// # Errors
    ///
    /// Returns `PoolFull` if the pool is at capacity, or `TaskAlreadyRunning`
    /// if the task already has a runner in flight.
    pub fn spawn<F>(&mut self, task_id: &TaskId, runner: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.has_capacity() {
            return Err(Error::PoolFull {
                max: self.max_concurrent,
            });
        }
        if self.in_flight.contains_key(task_id) {
            return Err(Error::TaskAlreadyRunning(task_id.clone()));
        }
        let id = self.runners.spawn(runner).id();
        self.in_flight.insert(task_id.clone(), id);
        self.owners.insert(id, task_id.clone());
        Ok(())
    }

    /// Release the slot held by a task. Returns false if it was not tracked.
    pub fn finish(&mut self, task_id: &TaskId) -> bool {
        match self.in_flight.remove(task_id) {
            Some(id) => {
                self.owners.remove(&id);
                true
            }
            None => false,
        }
    }

    /// Wait for a runner that ended while its task was still in flight.
    ///
    /// Runners report their own completion, so only a panicked or aborted
    /// runner is yielded here; its slot is released before it is returned.
    /// Returns `None` once no runner is left to wait on.
    ///
    /// Cancel safe.
    pub async fn next_lost(&mut self) -> Option<(TaskId, JoinError)> {
        while let Some(joined) = self.runners.join_next_with_id().await {
            let Err(err) = joined else {
                continue;
            };
            if let Some(task_id) = self.owners.remove(&err.id()) {
                self.in_flight.remove(&task_id);
                return Some((task_id, err));
            }
        }
        None
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.in_flight.contains_key(task_id)
    }

    /// Get the number of in-flight invocations.
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Check if the pool has capacity for another invocation.
    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_concurrent
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

/// Readable message of a runner's panic payload.
pub fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(err) => err.to_string(),
    }
}
