//! Build file loading and parsing.
//!
//! A YAML build file declares tasks, the directory they run in and watch
//! rules. [`load_build_plan`] reads one and produces a ready registry.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{BuildFileBuilder, BuildPlan, WatchPlan, load_build_plan};
pub use error::ConfigError;
pub use types::{
    BuildFile, DEFAULT_TASK, DEFAULT_WATCH_INTERVAL_MS, ServiceConfig, TaskConfig, TaskRef,
    TaskTypeConfig, WatchConfig,
};
pub use yaml::YamlLoader;
