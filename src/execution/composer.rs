//! Composition strategy seam used by macro-commands.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

use crate::core::command::CommandError;
use crate::core::context::Context;

use super::listener::{CompletionListener, Phase};

/// Strategy for running a macro-command's nested contexts.
///
/// A composer takes ownership of the nested contexts for one batch and must
/// report every one of them to `listener` exactly once, in a terminal state
/// or unchanged when skipped. This holds when the batch is interrupted too:
/// an `Err` return still leaves every context whose action ran with the
/// listener. The macro awaits the listener's barrier and collects the
/// contexts from it.
#[async_trait]
pub trait Composer: Send + Sync {
    /// Returns the name of this composer, used in logs.
    fn name(&self) -> &'static str;

    /// Run "do" for every nested context.
    async fn execute(
        &self,
        nested: VecDeque<Context>,
        listener: Arc<CompletionListener>,
    ) -> Result<(), CommandError>;

    /// Run "undo" for every nested context.
    async fn rollback(
        &self,
        nested: VecDeque<Context>,
        listener: Arc<CompletionListener>,
    ) -> Result<(), CommandError>;
}

/// Run the phase's action for one nested context.
///
/// A returned error (misuse by a nested command) is folded into the
/// context so it still ends in a terminal state.
pub(crate) async fn run_action(phase: Phase, ctx: &mut Context) {
    let command = Arc::clone(ctx.command());
    let outcome = match phase {
        Phase::Do => command.do_command(ctx).await,
        Phase::Undo => command.undo_command(ctx).await,
    };
    if let Err(err) = outcome {
        warn!(
            context = %ctx.id(),
            command = ctx.command_name(),
            phase = ?phase,
            error = %err,
            "nested command rejected its context"
        );
        if !ctx.is_failed() {
            ctx.failed(err);
        }
    }
}
