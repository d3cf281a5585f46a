//! Process supervision and the built-in leaf actions.
//!
//! The [`Supervisor`] owns process lifecycles; the actions in this module
//! are thin [`Action`](crate::core::task::Action) implementations on top of
//! it and the filesystem.

mod command;
mod fs;
mod supervisor;

pub use command::{CommandAction, CommandActionBuilder, ServiceAction, StartAction, StopAction};
pub use fs::{CleanAction, MkdirAction};
pub use supervisor::{
    ManagedProcess, ProcessHandle, ProcessSpec, ProcessState, SpawnOptions, Supervisor,
};
