//! Sequential composition.
//!
//! Runs nested contexts one after another on the invoking task. The result
//! of each successful command is offered to the next one; after the first
//! failure the remaining contexts are cancelled without running. Rollback
//! walks the contexts in reverse and stops at the first failed undo.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::command::CommandError;
use crate::core::context::Context;

use super::composer::{Composer, run_action};
use super::listener::{CompletionListener, Phase};

/// Runs nested commands in order, chaining results.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialComposer;

impl SequentialComposer {
    pub fn new() -> Self {
        Self
    }
}

/// Offer `previous` to the command of `ctx`.
///
/// A declined transfer leaves the context's input untouched and is recorded
/// as a warning on the context.
fn transfer(previous: &Value, ctx: &mut Context) {
    let command = Arc::clone(ctx.command());
    if let Err(err) = command.transfer_result(previous, ctx) {
        warn!(
            context = %ctx.id(),
            command = ctx.command_name(),
            error = %err,
            "result transfer declined"
        );
        ctx.record_warning(format!("result transfer declined: {err}"));
    }
}

#[async_trait]
impl Composer for SequentialComposer {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn execute(
        &self,
        nested: VecDeque<Context>,
        listener: Arc<CompletionListener>,
    ) -> Result<(), CommandError> {
        let mut previous: Option<Value> = None;
        let mut failed = false;

        for mut ctx in nested {
            if failed {
                listener.cancelled(ctx);
                continue;
            }

            if let Some(value) = previous.as_ref() {
                transfer(value, &mut ctx);
            }
            run_action(Phase::Do, &mut ctx).await;

            if ctx.is_done() {
                previous = ctx.result().cloned();
            } else {
                debug!(
                    context = %ctx.id(),
                    command = ctx.command_name(),
                    state = %ctx.state(),
                    "nested command did not finish, cancelling the rest"
                );
                failed = true;
            }
            listener.completed(ctx);
        }
        Ok(())
    }

    async fn rollback(
        &self,
        nested: VecDeque<Context>,
        listener: Arc<CompletionListener>,
    ) -> Result<(), CommandError> {
        let mut failed = false;

        for mut ctx in nested.into_iter().rev() {
            if failed {
                debug!(
                    context = %ctx.id(),
                    command = ctx.command_name(),
                    "skipping rollback after earlier failure"
                );
                listener.completed(ctx);
                continue;
            }

            run_action(Phase::Undo, &mut ctx).await;
            if !ctx.is_undone() {
                failed = true;
            }
            listener.completed(ctx);
        }
        Ok(())
    }
}
