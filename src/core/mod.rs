//! Core task model: names, definitions, the registry and the action context.

pub mod context;
pub mod registry;
pub mod task;
pub mod types;
