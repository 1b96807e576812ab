//! Execution context and its state machine.
//!
//! A [`Context`] is the mutable record of one command invocation: its
//! inputs, its result or failure, its lifecycle [`State`] and a timestamped
//! [`History`]. All mutation goes through the context's own transition
//! methods so every change is recorded and observed:
//!
//! - [`set_redo_input`](Context::set_redo_input): `Init -> Ready`
//! - [`start_work`](Context::start_work): `Ready | Done | Undone -> Work`
//! - [`set_result`](Context::set_result): `Work -> Done`
//! - [`set_undone`](Context::set_undone): `Done | Work -> Undone`
//! - [`failed`](Context::failed): any state `-> Failed`
//! - [`cancel`](Context::cancel): any state `-> Cancelled`

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::command::{Command, CommandError};
use super::history::{DurationRecord, History, StartRecord, StateRecord};
use super::state::{ContextListener, State, StateChanged};
use super::types::ContextId;

/// Parameter of a do or undo action.
#[derive(Debug)]
pub enum Input {
    /// Plain value for a simple command.
    Value(Value),
    /// Redo input of a macro-command: its own input plus the nested contexts.
    Macro(MacroParameter),
    /// Undo input of a macro-command: nested contexts that succeeded.
    Compensation(Vec<ContextId>),
}

impl Input {
    /// The plain value, if this is a value input.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Input::Value(value) => Some(value),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Input::Value(_) => "value",
            Input::Macro(_) => "macro",
            Input::Compensation(_) => "compensation",
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

/// Redo input of a macro-command.
///
/// Pairs the macro's original input with the contexts of its nested
/// commands, so that undo can find exactly the contexts "do" produced.
#[derive(Debug)]
pub struct MacroParameter {
    root_input: Value,
    nested: VecDeque<Context>,
}

impl MacroParameter {
    /// Create a parameter from the macro's input and its nested contexts.
    pub fn new(root_input: Value, nested: VecDeque<Context>) -> Self {
        Self { root_input, nested }
    }

    /// The input the macro was prepared with.
    pub fn root_input(&self) -> &Value {
        &self.root_input
    }

    /// Replace the macro's own input.
    pub fn set_root_input(&mut self, input: Value) {
        self.root_input = input;
    }

    /// Nested contexts in their original order.
    pub fn nested(&self) -> &VecDeque<Context> {
        &self.nested
    }

    /// Mutable access to the nested contexts.
    pub fn nested_mut(&mut self) -> &mut VecDeque<Context> {
        &mut self.nested
    }

    /// Move the nested contexts out, leaving the parameter empty.
    pub fn take_nested(&mut self) -> VecDeque<Context> {
        std::mem::take(&mut self.nested)
    }

    /// Put nested contexts back.
    pub fn restore_nested(&mut self, nested: VecDeque<Context>) {
        self.nested = nested;
    }
}

/// Handle returned by [`Context::add_listener`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// Mutable execution record of one command invocation.
pub struct Context {
    id: ContextId,
    command: Arc<dyn Command>,
    redo_input: Option<Input>,
    undo_input: Option<Input>,
    result: Option<Value>,
    failure: Option<CommandError>,
    state: State,
    started_at: Option<DateTime<Utc>>,
    duration: Option<Duration>,
    history: History,
    listeners: Vec<(ListenerHandle, Arc<dyn ContextListener>)>,
    next_listener: u64,
    warnings: Vec<String>,
}

impl Context {
    /// Create a context in `Init` for the given command.
    pub fn new(command: Arc<dyn Command>) -> Self {
        let mut history = History::new();
        history.record_initial(State::Init, Utc::now());
        Self {
            id: ContextId::new(),
            command,
            redo_input: None,
            undo_input: None,
            result: None,
            failure: None,
            state: State::Init,
            started_at: None,
            duration: None,
            history,
            listeners: Vec::new(),
            next_listener: 0,
            warnings: Vec::new(),
        }
    }

    /// Create a `Ready` context, letting the command shape its redo input.
    pub fn for_command(command: Arc<dyn Command>, input: Value) -> Self {
        let prepared = command.prepare_input(input);
        let mut ctx = Self::new(command);
        ctx.set_redo_input(prepared);
        ctx
    }

    /// Get the context's id.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Get the command owning this context.
    pub fn command(&self) -> &Arc<dyn Command> {
        &self.command
    }

    /// Get the name of the command owning this context.
    pub fn command_name(&self) -> &str {
        self.command.name()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    pub fn is_working(&self) -> bool {
        self.state == State::Work
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    pub fn is_undone(&self) -> bool {
        self.state == State::Undone
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == State::Cancelled
    }

    /// Get the redo input, if attached.
    pub fn redo_input(&self) -> Option<&Input> {
        self.redo_input.as_ref()
    }

    /// Attach the redo input. Moves an `Init` context to `Ready`.
    ///
    /// Replacing the input of a context that is already past `Init` keeps
    /// its state.
    pub fn set_redo_input(&mut self, input: Input) {
        self.redo_input = Some(input);
        if self.state == State::Init {
            self.transition(State::Ready);
        }
    }

    /// Deserialize the redo input as `T`.
    pub fn redo_value_as<T: DeserializeOwned>(&self) -> Result<T, CommandError> {
        value_as(self.command_name(), self.redo_input.as_ref())
    }

    /// Get the undo input, if attached.
    pub fn undo_input(&self) -> Option<&Input> {
        self.undo_input.as_ref()
    }

    /// Attach the undo input.
    ///
    /// Only accepted while the context is `Done` or `Work`; otherwise the
    /// input is dropped and the state is unchanged.
    pub fn set_undo_input(&mut self, input: Input) {
        if self.state.accepts_undo_input() {
            self.undo_input = Some(input);
        } else {
            debug!(
                context = %self.id,
                command = self.command_name(),
                state = %self.state,
                input = input.kind(),
                "dropping undo input attached outside of DONE/WORK"
            );
        }
    }

    /// Deserialize the undo input as `T`.
    pub fn undo_value_as<T: DeserializeOwned>(&self) -> Result<T, CommandError> {
        value_as(self.command_name(), self.undo_input.as_ref())
    }

    /// The macro parameter, if this is a composite context.
    pub fn macro_parameter(&self) -> Option<&MacroParameter> {
        match self.redo_input.as_ref() {
            Some(Input::Macro(param)) => Some(param),
            _ => None,
        }
    }

    /// Mutable access to the macro parameter, if this is a composite context.
    pub fn macro_parameter_mut(&mut self) -> Option<&mut MacroParameter> {
        match self.redo_input.as_mut() {
            Some(Input::Macro(param)) => Some(param),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&CommandError> {
        self.failure.as_ref()
    }

    /// Start of the latest work interval.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Duration of the latest finished work interval.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Get the transition history.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Non-fatal conditions recorded while orchestrating this context.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Record a non-fatal condition.
    pub fn record_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Enter `Work`.
    ///
    /// Returns `false` without changing anything unless the context is
    /// `Ready`, `Done` or `Undone`.
    pub fn start_work(&mut self) -> bool {
        if !self.state.can_start_work() {
            return false;
        }
        self.transition(State::Work);
        true
    }

    /// Store the result and enter `Done`.
    ///
    /// No-op returning `false` unless the context is `Work`.
    pub fn set_result(&mut self, value: Value) -> bool {
        if self.state != State::Work {
            debug!(
                context = %self.id,
                command = self.command_name(),
                state = %self.state,
                "ignoring result outside of WORK"
            );
            return false;
        }
        self.result = Some(value);
        self.failure = None;
        self.transition(State::Done);
        true
    }

    /// Store the failure and enter `Failed`. Legal from every state.
    pub fn failed(&mut self, error: CommandError) {
        self.failure = Some(error);
        self.result = None;
        self.transition(State::Failed);
    }

    /// Enter `Undone`.
    ///
    /// Returns `false` without changing anything unless the context is
    /// `Done` or `Work`.
    pub fn set_undone(&mut self) -> bool {
        if !matches!(self.state, State::Done | State::Work) {
            return false;
        }
        self.transition(State::Undone);
        true
    }

    /// Force the context into `Cancelled`, whatever its state.
    pub fn cancel(&mut self) {
        self.transition(State::Cancelled);
    }

    /// Register a listener. Listeners are notified in registration order.
    pub fn add_listener(&mut self, listener: Arc<dyn ContextListener>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((handle, listener));
        handle
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&mut self, handle: ListenerHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(h, _)| *h != handle);
        self.listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Serializable view of the context, including nested contexts.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            id: self.id,
            command: self.command_name().to_string(),
            state: self.state,
            result: self.result.clone(),
            failure: self.failure.as_ref().map(|e| e.to_string()),
            started_at: self.started_at,
            duration_ms: self.duration.map(|d| d.as_millis() as u64),
            states: self.history.states(),
            started: self.history.started(),
            durations: self.history.durations(),
            warnings: self.warnings.clone(),
            nested: self
                .macro_parameter()
                .map(|param| param.nested().iter().map(Context::snapshot).collect())
                .unwrap_or_default(),
        }
    }

    fn transition(&mut self, next: State) {
        let event = StateChanged {
            context_id: self.id,
            command: self.command_name().to_string(),
            previous: self.state,
            current: next,
            at: Utc::now(),
        };
        self.state = next;

        let closed = self.history.observe(&event, Instant::now());
        if next == State::Work {
            self.started_at = Some(event.at);
        }
        if closed.is_some() {
            self.duration = closed;
        }

        for (_, listener) in &self.listeners {
            let notified = catch_unwind(AssertUnwindSafe(|| listener.state_changed(&event)));
            if notified.is_err() {
                warn!(
                    context = %self.id,
                    command = %event.command,
                    previous = %event.previous,
                    current = %event.current,
                    "context listener panicked"
                );
            }
        }
    }
}

fn value_as<T: DeserializeOwned>(command: &str, input: Option<&Input>) -> Result<T, CommandError> {
    let value = input
        .and_then(Input::as_value)
        .ok_or_else(|| CommandError::MissingInput {
            command: command.to_string(),
        })?;
    Ok(serde_json::from_value(value.clone())?)
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("command", &self.command_name())
            .field("state", &self.state)
            .field("redo_input", &self.redo_input)
            .field("undo_input", &self.undo_input)
            .field("result", &self.result)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a context for the calling layer.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub id: ContextId,
    pub command: String,
    pub state: State,
    pub result: Option<Value>,
    pub failure: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub states: Vec<StateRecord>,
    pub started: Vec<StartRecord>,
    pub durations: Vec<DurationRecord>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<ContextSnapshot>,
}
