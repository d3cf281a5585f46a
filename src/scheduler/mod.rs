//! Task graph scheduler.
//!
//! Runs named tasks from a [`TaskRegistry`](crate::core::registry::TaskRegistry)
//! with per-run memoization and reports the outcome of every task reached.

mod engine;
mod types;

pub use engine::Scheduler;
pub use types::{Completion, Execution, ExecutionState, RunReport};
