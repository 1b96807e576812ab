//! Parallel composition.
//!
//! Every nested context of a batch is handed to a worker from the
//! [`WorkerPool`]. A worker packages its context into a [`PendingAction`],
//! pushes it onto the batch's handoff channel and waits for a one-shot
//! completion signal. The invoking task is the coordinator: it drains the
//! channel, runs each action inline and signals the worker, which then
//! reports the context to the [`CompletionListener`]. Command logic never
//! runs on a worker, so side effects are serialized on the coordinator.
//!
//! Once the channel is drained the coordinator waits for the listener's
//! barrier, racing an interrupt token.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::config::EngineConfig;
use crate::core::command::CommandError;
use crate::core::context::Context;

use super::composer::{Composer, run_action};
use super::listener::{CompletionListener, Phase};
use super::pool::WorkerPool;

/// One action waiting for the coordinator.
struct PendingAction {
    phase: Phase,
    context: Context,
    done: oneshot::Sender<Context>,
}

impl PendingAction {
    /// Run the action and hand the context back to its worker.
    ///
    /// Returns the context if the worker is gone.
    async fn run(self) -> Result<(), Context> {
        let PendingAction {
            phase,
            mut context,
            done,
        } = self;
        run_action(phase, &mut context).await;
        done.send(context)
    }
}

/// Fans nested commands out over a worker pool.
#[derive(Debug, Clone)]
pub struct ParallelComposer {
    pool: Arc<WorkerPool>,
    interrupt: CancellationToken,
    handoff_capacity: Option<usize>,
}

impl ParallelComposer {
    /// Create a composer dispatching through `pool`.
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            interrupt: CancellationToken::new(),
            handoff_capacity: None,
        }
    }

    /// Create a composer with its own pool, sized from configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Arc::new(WorkerPool::from_config(config)))
            .with_handoff_capacity(config.handoff_capacity)
    }

    /// Use `token` to interrupt waits for nested commands.
    pub fn with_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = token;
        self
    }

    /// Bound the handoff channel. `None` sizes it to the batch.
    pub fn with_handoff_capacity(mut self, capacity: Option<usize>) -> Self {
        self.handoff_capacity = capacity;
        self
    }

    /// Token that interrupts this composer's waits when cancelled.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Get the worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    async fn dispatch(
        &self,
        phase: Phase,
        nested: VecDeque<Context>,
        listener: Arc<CompletionListener>,
    ) -> Result<(), CommandError> {
        let count = nested.len();
        if count == 0 {
            warn!(phase = ?phase, "no nested contexts to dispatch");
            return Ok(());
        }

        let span = info_span!("parallel_batch", phase = ?phase, count = count);
        async move {
            let capacity = self.handoff_capacity.unwrap_or(count).max(1);
            let (tx, mut rx) = mpsc::channel::<PendingAction>(capacity);

            for ctx in nested {
                let tx = tx.clone();
                let listener = Arc::clone(&listener);
                self.pool.spawn(move |permit| async move {
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(err) => {
                            warn!(
                                context = %ctx.id(),
                                command = ctx.command_name(),
                                error = %err,
                                "worker rejected, cancelling nested context"
                            );
                            drop(tx);
                            listener.cancelled(ctx);
                            return;
                        }
                    };

                    let id = ctx.id();
                    let (done, signal) = oneshot::channel();
                    let action = PendingAction {
                        phase,
                        context: ctx,
                        done,
                    };
                    if let Err(mpsc::error::SendError(action)) = tx.send(action).await {
                        warn!(context = %id, "coordinator gone, cancelling nested context");
                        listener.cancelled(action.context);
                        return;
                    }
                    drop(tx);

                    match signal.await {
                        Ok(ctx) => listener.completed(ctx),
                        Err(_) => listener.abandon(id),
                    }
                    drop(permit);
                });
            }
            drop(tx);

            // Every worker drops its sender after handing off, so this ends
            // once each dispatched context has been seen exactly once.
            while let Some(action) = rx.recv().await {
                debug!(context = %action.context.id(), "running handed-off action");
                if let Err(ctx) = action.run().await {
                    listener.completed(ctx);
                }
            }

            tokio::select! {
                biased;
                _ = self.interrupt.cancelled() => {
                    warn!(
                        remaining = listener.remaining(),
                        "interrupted while waiting for nested commands"
                    );
                    // Every action already ran; the remaining workers only
                    // have to hand their contexts back.
                    listener.wait().await;
                    Err(CommandError::Interrupted(self.name().to_string()))
                }
                _ = listener.wait() => Ok(()),
            }
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl Composer for ParallelComposer {
    fn name(&self) -> &'static str {
        "parallel"
    }

    async fn execute(
        &self,
        nested: VecDeque<Context>,
        listener: Arc<CompletionListener>,
    ) -> Result<(), CommandError> {
        self.dispatch(Phase::Do, nested, listener).await
    }

    async fn rollback(
        &self,
        nested: VecDeque<Context>,
        listener: Arc<CompletionListener>,
    ) -> Result<(), CommandError> {
        self.dispatch(Phase::Undo, nested, listener).await
    }
}
