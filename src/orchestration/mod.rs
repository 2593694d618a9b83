//! Orchestration layer: scheduling, per-task attempt loops, validation and
//! retry, the intent step and final synthesis.

pub mod intent;
pub mod pool;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod synthesis;
pub mod validation;

pub use intent::{ContextRequest, IntentStep};
pub use pool::WorkerPool;
pub use retry::{AttemptEvent, AttemptState, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use runner::{Assignment, RunnerTimeouts, TaskEvent, TaskOutcome, TaskRunner};
pub use scheduler::{BlockedTask, EngineEvent, Scheduler, SchedulerReport, TaskFailure};
pub use synthesis::{SynthesisOutcome, SynthesisStage, SynthesisTimeouts};
pub use validation::{Subject, ValidationLog, ValidationRecord};
