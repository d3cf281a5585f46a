//! Process output multiplexing.
//!
//! Raw byte streams from many concurrent processes are turned into
//! `name: line` frames and written to two shared sinks, one frame per write.

mod frame;
mod multiplexer;
mod sink;

pub use frame::{LINE_ENDING, LineFramer, OutputFrame, StreamKind};
pub use multiplexer::Multiplexer;
pub use sink::{MemorySink, Sink};
