//! Command execution engine.
//!
//! This module provides macro-commands and the machinery that runs their
//! nested commands: composers, the worker pool, and the completion
//! listener with its countdown barrier.

mod composer;
mod latch;
mod listener;
mod macro_command;
mod parallel;
mod pool;
mod sequential;

pub use composer::Composer;
pub use latch::CountdownLatch;
pub use listener::{BatchOutcome, CompletionListener, Phase};
pub use macro_command::MacroCommand;
pub use parallel::ParallelComposer;
pub use pool::{PoolError, WorkerPool};
pub use sequential::SequentialComposer;
