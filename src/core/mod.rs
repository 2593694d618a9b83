//! Core domain models: tasks, decomposition input and the execution plan.

pub mod descriptor;
pub mod plan;
pub mod task;

pub use descriptor::{parse_descriptors, TaskDescriptor};
pub use plan::{ExecutionPlan, PlanSnapshot};
pub use task::{AgentKind, Task, TaskId, TaskResult, TaskStatus};
