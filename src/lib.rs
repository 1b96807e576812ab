//! cascade: a transactional command-execution engine.
//!
//! Units of work implement [`Operation`] (or [`Command`] directly) and run
//! against a [`Context`] that records inputs, result or failure, lifecycle
//! state and timing history. A [`MacroCommand`] composes nested commands,
//! sequentially or over a worker pool, and compensates the ones that
//! succeeded when any of them fails.
//!
//! ```ignore
//! use cascade::{Context, MacroCommand, ParallelComposer, WorkerPool};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let composer = ParallelComposer::new(Arc::new(WorkerPool::new(4)));
//! let batch = Arc::new(MacroCommand::parallel("notify", composer));
//! batch.add_nested(email)?;
//! batch.add_nested(sms)?;
//!
//! let mut ctx = Context::for_command(batch.clone(), json!({"user": 7}));
//! batch.do_command(&mut ctx).await?;
//! assert!(ctx.is_done() || ctx.is_failed());
//! ```

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod logging;
pub mod testing;

pub use config::{ConfigError, ConfigLoader, EngineConfig};
pub use core::command::{Command, CommandError, Operation};
pub use core::context::{Context, ContextSnapshot, Input, ListenerHandle, MacroParameter};
pub use core::history::{DurationRecord, History, StartRecord, StateRecord};
pub use core::state::{ContextListener, State, StateChanged};
pub use core::types::ContextId;
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    Composer, CompletionListener, MacroCommand, ParallelComposer, PoolError, SequentialComposer,
    WorkerPool,
};
pub use logging::{TracingListener, init_logging};
