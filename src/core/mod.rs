//! Core engine types: contexts, their state machine and history, and the
//! command capability.

pub mod command;
pub mod context;
pub mod history;
pub mod state;
pub mod types;
