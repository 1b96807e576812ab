//! Command traits and error types.
//!
//! [`Command`] is the capability the engine drives: run "do" or "undo"
//! against a [`Context`]. Most units of work implement the simpler
//! [`Operation`] trait instead; a blanket implementation wraps every
//! operation in the standard do/undo lifecycle (input validation, state
//! transitions, failure capture).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::context::{Context, Input};
use super::state::State;

/// Errors produced while running commands.
///
/// Execution failures are captured into the failing context and never
/// returned from `do_command`/`undo_command`. Only programming errors
/// (see [`is_programming_error`](Self::is_programming_error)) and
/// interruption are returned as `Err`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// The unit of work failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The context has no redo input.
    #[error("command '{command}' has no redo input")]
    MissingInput { command: String },

    /// The context is in a state the requested action cannot start from.
    #[error("command '{command}' cannot run from state {state}")]
    InvalidState { command: String, state: State },

    /// The context does not carry the input variant the command needs.
    #[error("command '{command}' expected a {expected} context")]
    WrongContextType {
        command: String,
        expected: &'static str,
    },

    /// The command does not accept the result of a previous command.
    #[error("command '{0}' does not support result transfer")]
    TransferUnsupported(String),

    /// A nested context was cancelled before it could run.
    #[error("nested context of '{0}' was cancelled before execution")]
    Cancelled(String),

    /// Waiting for nested commands was interrupted.
    #[error("interrupted while waiting for nested commands of '{0}'")]
    Interrupted(String),

    /// Nested commands were added after the macro started executing.
    #[error("command '{0}' is sealed; nested commands can only be added before execution")]
    Sealed(String),

    /// A typed input could not be converted.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CommandError {
    /// Check if this error reports an interrupted wait.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CommandError::Interrupted(_))
    }

    /// Check if this error reports misuse of the engine rather than a
    /// failure of the work itself.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            CommandError::MissingInput { .. }
                | CommandError::InvalidState { .. }
                | CommandError::WrongContextType { .. }
                | CommandError::Sealed(_)
        )
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        CommandError::Serialization(err.to_string())
    }
}

/// A unit of work the engine can run and revert.
///
/// Implementations must leave every failure of the work itself in the
/// context (`ctx.failed(..)`) and return `Ok(())`; `Err` is reserved for
/// misuse (missing input, wrong state or context type) and interruption.
#[async_trait]
pub trait Command: Send + Sync {
    /// Returns the name of this command, used in logs and errors.
    fn name(&self) -> &str;

    /// Build the redo input for a new context of this command.
    ///
    /// Plain commands wrap the value as-is; composite commands build their
    /// nested contexts here.
    fn prepare_input(&self, input: Value) -> Input {
        Input::Value(input)
    }

    /// Run the forward action against `ctx`.
    async fn do_command(&self, ctx: &mut Context) -> Result<(), CommandError>;

    /// Run the reverse action against a `Done` context.
    async fn undo_command(&self, ctx: &mut Context) -> Result<(), CommandError>;

    /// Move the result of a previous command into `ctx`'s redo input.
    ///
    /// Default implementation declines the transfer.
    fn transfer_result(&self, previous: &Value, ctx: &mut Context) -> Result<(), CommandError> {
        let _ = (previous, ctx);
        Err(CommandError::TransferUnsupported(self.name().to_string()))
    }
}

/// A do-action paired with an undo-action.
///
/// # Example
///
/// ```ignore
/// use cascade::{CommandError, Context, Operation};
/// use async_trait::async_trait;
/// use serde_json::{Value, json};
///
/// struct Deposit;
///
/// #[async_trait]
/// impl Operation for Deposit {
///     fn name(&self) -> &str {
///         "deposit"
///     }
///
///     async fn perform(&self, ctx: &mut Context) -> Result<Value, CommandError> {
///         let amount: i64 = ctx.redo_value_as()?;
///         // Remember what to take back on undo
///         ctx.set_undo_input(json!(amount).into());
///         Ok(json!(amount))
///     }
///
///     async fn revert(&self, ctx: &mut Context) -> Result<(), CommandError> {
///         let _amount: i64 = ctx.undo_value_as()?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Operation: Send + Sync {
    /// Returns the name of this operation.
    fn name(&self) -> &str;

    /// Do the work. The returned value becomes the context's result.
    ///
    /// Runs while the context is in `Work`; this is the place to attach an
    /// undo input.
    async fn perform(&self, ctx: &mut Context) -> Result<Value, CommandError>;

    /// Revert the work.
    async fn revert(&self, ctx: &mut Context) -> Result<(), CommandError>;

    /// Accept the result of the previous command in a sequence.
    ///
    /// Default implementation declines.
    fn accept_result(&self, previous: &Value, ctx: &mut Context) -> Result<(), CommandError> {
        let _ = (previous, ctx);
        Err(CommandError::TransferUnsupported(self.name().to_string()))
    }
}

#[async_trait]
impl<T: Operation> Command for T {
    fn name(&self) -> &str {
        Operation::name(self)
    }

    async fn do_command(&self, ctx: &mut Context) -> Result<(), CommandError> {
        let name = Operation::name(self);
        if ctx.redo_input().is_none() {
            let err = CommandError::MissingInput {
                command: name.to_string(),
            };
            ctx.failed(err.clone());
            return Err(err);
        }
        if !ctx.start_work() {
            let err = CommandError::InvalidState {
                command: name.to_string(),
                state: ctx.state(),
            };
            ctx.failed(err.clone());
            return Err(err);
        }

        match self.perform(ctx).await {
            Ok(value) => {
                ctx.set_result(value);
            }
            Err(err) => {
                debug!(command = name, context = %ctx.id(), error = %err, "do action failed");
                ctx.failed(err);
            }
        }
        Ok(())
    }

    async fn undo_command(&self, ctx: &mut Context) -> Result<(), CommandError> {
        let name = Operation::name(self);
        if !ctx.is_done() || !ctx.start_work() {
            let err = CommandError::InvalidState {
                command: name.to_string(),
                state: ctx.state(),
            };
            ctx.failed(err.clone());
            return Err(err);
        }

        match self.revert(ctx).await {
            Ok(()) => {
                ctx.set_undone();
            }
            Err(err) => {
                debug!(command = name, context = %ctx.id(), error = %err, "undo action failed");
                ctx.failed(err);
            }
        }
        Ok(())
    }

    fn transfer_result(&self, previous: &Value, ctx: &mut Context) -> Result<(), CommandError> {
        self.accept_result(previous, ctx)
    }
}
