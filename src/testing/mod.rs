//! Testing utilities for users of the cascade library.
//!
//! This module provides helpers for testing command orchestration:
//!
//! - [`Ledger`]: Records which actions ran, in order, and how many overlapped
//! - [`ScriptedCommand`]: A command whose do/undo outcome is configured up front
//! - [`RecordingListener`]: A context listener that captures every transition

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::command::{Command, CommandError, Operation};
use crate::core::context::Context;
use crate::core::state::{ContextListener, State, StateChanged};

/// Shared log of executed actions.
///
/// Entries have the form `"<command>:do"` or `"<command>:undo"`. The ledger
/// also tracks how many actions were running at the same time.
#[derive(Debug, Default)]
pub struct Ledger {
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self, entry: String) {
        self.calls.lock().push(entry);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// All recorded actions in execution order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of times `command` ran `action` ("do" or "undo").
    pub fn count(&self, command: &str, action: &str) -> usize {
        let entry = format!("{command}:{action}");
        self.calls.lock().iter().filter(|c| **c == entry).count()
    }

    /// Check whether `command` ever ran `action`.
    pub fn ran(&self, command: &str, action: &str) -> bool {
        self.count(command, action) > 0
    }

    /// Highest number of actions observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// A command with a scripted outcome.
///
/// "do" reads an integer input and returns it plus a configured addend;
/// "undo" always succeeds unless configured to fail. Every action is written
/// to the shared [`Ledger`].
///
/// # Example
///
/// ```
/// use cascade::Command;
/// use cascade::testing::{Ledger, ScriptedCommand};
///
/// let ledger = Ledger::new();
/// let step = ScriptedCommand::new("reserve", &ledger).adding(10).into_command();
/// assert_eq!(step.name(), "reserve");
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedCommand {
    name: String,
    ledger: Arc<Ledger>,
    addend: i64,
    fail_do: bool,
    fail_undo: bool,
    delay: Option<Duration>,
    accepts_transfer: bool,
}

impl ScriptedCommand {
    /// Create a command that returns its input unchanged.
    pub fn new(name: impl Into<String>, ledger: &Arc<Ledger>) -> Self {
        Self {
            name: name.into(),
            ledger: Arc::clone(ledger),
            addend: 0,
            fail_do: false,
            fail_undo: false,
            delay: None,
            accepts_transfer: true,
        }
    }

    /// Add `addend` to the input on "do".
    pub fn adding(mut self, addend: i64) -> Self {
        self.addend = addend;
        self
    }

    /// Make "do" fail.
    pub fn failing_do(mut self) -> Self {
        self.fail_do = true;
        self
    }

    /// Make "undo" fail.
    pub fn failing_undo(mut self) -> Self {
        self.fail_undo = true;
        self
    }

    /// Sleep for `delay` inside every action.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Decline results transferred from a previous command.
    pub fn without_transfer(mut self) -> Self {
        self.accepts_transfer = false;
        self
    }

    /// Convert into a shareable command.
    pub fn into_command(self) -> Arc<dyn Command> {
        Arc::new(self)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Operation for ScriptedCommand {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform(&self, ctx: &mut Context) -> Result<Value, CommandError> {
        self.ledger.enter(format!("{}:do", self.name));
        self.pause().await;
        self.ledger.exit();

        if self.fail_do {
            return Err(CommandError::ExecutionFailed(format!(
                "{} failed",
                self.name
            )));
        }
        let input: i64 = ctx.redo_value_as()?;
        ctx.set_undo_input(json!(input).into());
        Ok(json!(input + self.addend))
    }

    async fn revert(&self, _ctx: &mut Context) -> Result<(), CommandError> {
        self.ledger.enter(format!("{}:undo", self.name));
        self.pause().await;
        self.ledger.exit();

        if self.fail_undo {
            return Err(CommandError::ExecutionFailed(format!(
                "{} could not be reverted",
                self.name
            )));
        }
        Ok(())
    }

    fn accept_result(&self, previous: &Value, ctx: &mut Context) -> Result<(), CommandError> {
        if !self.accepts_transfer {
            return Err(CommandError::TransferUnsupported(self.name.clone()));
        }
        ctx.set_redo_input(previous.clone().into());
        Ok(())
    }
}

/// A listener that records every state change it observes.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<StateChanged>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All observed events.
    pub fn events(&self) -> Vec<StateChanged> {
        self.events.lock().clone()
    }

    /// The sequence of states entered.
    pub fn states(&self) -> Vec<State> {
        self.events.lock().iter().map(|e| e.current).collect()
    }
}

impl ContextListener for RecordingListener {
    fn state_changed(&self, event: &StateChanged) {
        self.events.lock().push(event.clone());
    }
}
