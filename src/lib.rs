//! Tessera: a task-graph execution engine.
//!
//! A request is decomposed into tasks, the tasks are built into a validated
//! dependency graph, and the graph is executed with bounded parallelism.
//! Every worker result passes a validator before dependents may use it;
//! rejected results are retried with feedback up to a bound. Once the graph
//! is resolved, a synthesis stage drafts the final response over the whole
//! run's history, under the same validate/retry contract.

pub mod backend;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod log;
pub mod memory;
pub mod orchestration;

pub use config::EngineConfig;
pub use engine::{Backends, Engine, FailureReport, FinalOutput, RunId, RunOutcome};
pub use error::{Error, InvocationError, PlanError, Result};
