//! Shared completion listener for one batch of nested contexts.
//!
//! Composers hand every nested context back through
//! [`CompletionListener::completed`] (or [`cancelled`](CompletionListener::cancelled))
//! once it reaches a terminal state. The listener sorts contexts into
//! succeeded and failed buckets and counts down the batch barrier.

use parking_lot::Mutex;
use tracing::debug;

use crate::core::context::Context;
use crate::core::state::State;
use crate::core::types::ContextId;

use super::latch::CountdownLatch;

/// Which action a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Do,
    Undo,
}

impl Phase {
    /// The state a nested context ends in when its action succeeded.
    pub fn success_state(&self) -> State {
        match self {
            Phase::Do => State::Done,
            Phase::Undo => State::Undone,
        }
    }
}

/// Everything a batch produced.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Contexts in completion order.
    pub contexts: Vec<Context>,
    /// Ids of contexts whose action succeeded, in completion order.
    pub succeeded: Vec<ContextId>,
    /// Ids of contexts whose action failed, in completion order.
    pub failed: Vec<ContextId>,
    /// Ids of contexts cancelled before running.
    pub cancelled: Vec<ContextId>,
}

impl BatchOutcome {
    /// The first failed context, if any.
    pub fn first_failure(&self) -> Option<&Context> {
        let id = self.failed.first()?;
        self.contexts.iter().find(|ctx| ctx.id() == *id)
    }
}

/// Collects nested contexts as they finish and releases the batch barrier.
#[derive(Debug)]
pub struct CompletionListener {
    phase: Phase,
    latch: CountdownLatch,
    outcome: Mutex<BatchOutcome>,
}

impl CompletionListener {
    /// Create a listener expecting `expected` nested contexts.
    pub fn new(phase: Phase, expected: usize) -> Self {
        Self {
            phase,
            latch: CountdownLatch::new(expected),
            outcome: Mutex::new(BatchOutcome::default()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Report a nested context that finished its action (or was skipped).
    pub fn completed(&self, ctx: Context) {
        {
            let mut outcome = self.outcome.lock();
            let id = ctx.id();
            match ctx.state() {
                state if state == self.phase.success_state() => outcome.succeeded.push(id),
                State::Failed => outcome.failed.push(id),
                State::Cancelled => outcome.cancelled.push(id),
                _ => {}
            }
            outcome.contexts.push(ctx);
        }
        self.latch.count_down();
    }

    /// Force a nested context into `Cancelled` without running it.
    ///
    /// The context's own listeners see the transition with its current
    /// state as `previous`.
    pub fn cancelled(&self, mut ctx: Context) {
        let previous = ctx.state();
        ctx.cancel();
        debug!(
            context = %ctx.id(),
            command = ctx.command_name(),
            previous = %previous,
            "nested context cancelled"
        );
        self.completed(ctx);
    }

    /// Release the barrier slot of a context that can no longer be reported.
    pub fn abandon(&self, id: ContextId) {
        debug!(context = %id, "nested context abandoned");
        self.latch.count_down();
    }

    /// Contexts still outstanding.
    pub fn remaining(&self) -> usize {
        self.latch.count()
    }

    /// Wait until every expected context has been reported.
    pub async fn wait(&self) {
        self.latch.wait().await;
    }

    /// Take everything reported so far.
    pub fn take_outcome(&self) -> BatchOutcome {
        std::mem::take(&mut *self.outcome.lock())
    }
}
