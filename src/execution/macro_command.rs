//! Macro-commands.
//!
//! A `MacroCommand` groups nested commands into one unit that either fully
//! succeeds or is compensated. How the nested commands run is decided by
//! the injected [`Composer`]:
//!
//! ```text
//! do:   prepare nested contexts -> composer.execute -> barrier
//!         all done   -> parent DONE, result = last nested result
//!         any failed -> parent FAIL, roll back the succeeded ones
//! undo: composer.rollback(succeeded) -> barrier
//!         all undone -> parent UNDONE
//!         any failed -> parent FAIL, redo the ones that were undone
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Instrument, debug, info_span, warn};

use crate::core::command::{Command, CommandError};
use crate::core::context::{Context, Input, MacroParameter};
use crate::core::types::ContextId;
use crate::events::{Event, EventBus};

use super::composer::{Composer, run_action};
use super::listener::{BatchOutcome, CompletionListener, Phase};
use super::parallel::ParallelComposer;
use super::sequential::SequentialComposer;

/// A command composed of nested commands.
///
/// Nested commands can be added until the macro prepares its first context;
/// from then on the set is sealed.
///
/// # Example
///
/// ```ignore
/// use cascade::{Context, MacroCommand};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let checkout = Arc::new(MacroCommand::sequential("checkout"));
/// checkout.add_nested(reserve_stock)?;
/// checkout.add_nested(charge_card)?;
///
/// let mut ctx = Context::for_command(checkout.clone(), json!(order));
/// checkout.do_command(&mut ctx).await?;
/// ```
pub struct MacroCommand {
    name: String,
    composer: Arc<dyn Composer>,
    nested: RwLock<Vec<Arc<dyn Command>>>,
    sealed: AtomicBool,
    events: Option<Arc<EventBus>>,
}

impl MacroCommand {
    /// Create a macro-command using the given composer.
    pub fn new(name: impl Into<String>, composer: Arc<dyn Composer>) -> Self {
        Self {
            name: name.into(),
            composer,
            nested: RwLock::new(Vec::new()),
            sealed: AtomicBool::new(false),
            events: None,
        }
    }

    /// Create a macro-command that runs nested commands in order.
    pub fn sequential(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(SequentialComposer::new()))
    }

    /// Create a macro-command that fans nested commands out over a pool.
    pub fn parallel(name: impl Into<String>, composer: ParallelComposer) -> Self {
        Self::new(name, Arc::new(composer))
    }

    /// Emit lifecycle events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Append a nested command.
    ///
    /// Fails with [`CommandError::Sealed`] once the macro has prepared a
    /// context.
    pub fn add_nested(&self, command: Arc<dyn Command>) -> Result<(), CommandError> {
        let mut nested = self.nested.write();
        if self.sealed.load(Ordering::SeqCst) {
            return Err(CommandError::Sealed(self.name.clone()));
        }
        nested.push(command);
        Ok(())
    }

    /// The nested commands, in order.
    pub fn nested_commands(&self) -> Vec<Arc<dyn Command>> {
        self.nested.read().clone()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub fn composer(&self) -> &Arc<dyn Composer> {
        &self.composer
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.emit(event).await;
        }
    }

    /// Check that `ctx` carries a usable macro parameter.
    ///
    /// Missing inputs fail the context; a context of another kind is left
    /// untouched.
    fn validate(&self, ctx: &mut Context) -> Result<(), CommandError> {
        let missing = match ctx.redo_input() {
            None => Some(self.name.clone()),
            Some(Input::Macro(param)) => param
                .nested()
                .iter()
                .find(|nested| nested.redo_input().is_none())
                .map(|nested| nested.command_name().to_string()),
            Some(_) => {
                return Err(CommandError::WrongContextType {
                    command: self.name.clone(),
                    expected: "macro",
                });
            }
        };

        if let Some(command) = missing {
            let err = CommandError::MissingInput { command };
            ctx.failed(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn invalid_state(&self, ctx: &mut Context) -> CommandError {
        let err = CommandError::InvalidState {
            command: self.name.clone(),
            state: ctx.state(),
        };
        ctx.failed(err.clone());
        err
    }

    /// The error a failed nested context carries.
    fn failure_of(&self, nested: &Context, action: &str) -> CommandError {
        nested.failure().cloned().unwrap_or_else(|| {
            CommandError::ExecutionFailed(format!("{action} of '{}'", self.name))
        })
    }

    /// Put nested contexts back into the parameter in their original order.
    fn restore(ctx: &mut Context, order: &[ContextId], contexts: Vec<Context>) {
        if let Some(param) = ctx.macro_parameter_mut() {
            param.restore_nested(arrange(order, contexts));
        }
    }

    async fn run_do(&self, ctx: &mut Context) -> Result<(), CommandError> {
        self.sealed.store(true, Ordering::SeqCst);
        self.validate(ctx)?;
        if !ctx.start_work() {
            return Err(self.invalid_state(ctx));
        }

        let nested = match ctx.macro_parameter_mut() {
            Some(param) => param.take_nested(),
            None => VecDeque::new(),
        };
        let order: Vec<ContextId> = nested.iter().map(Context::id).collect();
        self.emit(Event::macro_started(ctx.id(), &self.name, nested.len()))
            .await;

        if nested.is_empty() {
            warn!(command = %self.name, "macro has no nested commands");
            ctx.set_undo_input(Input::Compensation(Vec::new()));
            ctx.set_result(Value::Null);
            self.emit(Event::macro_completed(ctx.id(), &self.name, ctx.duration()))
                .await;
            return Ok(());
        }

        let listener = Arc::new(CompletionListener::new(Phase::Do, nested.len()));
        let dispatched = self.composer.execute(nested, Arc::clone(&listener)).await;
        if dispatched.is_ok() {
            listener.wait().await;
        }
        let outcome = listener.take_outcome();
        // First failure in completion order decides the parent's error.
        let failure = outcome
            .first_failure()
            .map(|nested| self.failure_of(nested, "nested command"));
        let BatchOutcome {
            contexts,
            succeeded,
            cancelled,
            ..
        } = outcome;

        if let Err(err) = dispatched {
            let err = if err.is_interrupted() {
                CommandError::Interrupted(self.name.clone())
            } else {
                err
            };
            warn!(
                command = %self.name,
                collected = contexts.len(),
                expected = order.len(),
                error = %err,
                "nested execution aborted"
            );
            Self::restore(ctx, &order, contexts);
            ctx.failed(err.clone());
            self.emit(Event::macro_failed(ctx.id(), &self.name, err.to_string()))
                .await;
            return Err(err);
        }

        let failure = failure.or_else(|| {
            (!cancelled.is_empty()).then(|| CommandError::Cancelled(self.name.clone()))
        });
        Self::restore(ctx, &order, contexts);

        match failure {
            None => {
                let result = ctx
                    .macro_parameter()
                    .and_then(|param| param.nested().back())
                    .and_then(Context::result)
                    .cloned()
                    .unwrap_or(Value::Null);
                ctx.set_undo_input(Input::Compensation(succeeded));
                ctx.set_result(result);
                debug!(command = %self.name, context = %ctx.id(), "macro done");
                self.emit(Event::macro_completed(ctx.id(), &self.name, ctx.duration()))
                    .await;
            }
            Some(err) => {
                debug!(
                    command = %self.name,
                    context = %ctx.id(),
                    error = %err,
                    "nested command failed, compensating"
                );
                ctx.failed(err.clone());
                self.emit(Event::macro_failed(ctx.id(), &self.name, err.to_string()))
                    .await;
                let rollback = self.compensate(ctx, &succeeded).await?;
                if let Some(rollback_err) = rollback.failure {
                    warn!(
                        command = %self.name,
                        context = %ctx.id(),
                        error = %rollback_err,
                        "compensation left nested commands applied"
                    );
                }
            }
        }
        Ok(())
    }

    /// Roll back every nested context listed in `ids` that is still `Done`.
    ///
    /// The nested contexts are written back before returning.
    async fn compensate(
        &self,
        ctx: &mut Context,
        ids: &[ContextId],
    ) -> Result<Rollback, CommandError> {
        let nested = match ctx.macro_parameter_mut() {
            Some(param) => param.take_nested(),
            None => VecDeque::new(),
        };
        let order: Vec<ContextId> = nested.iter().map(Context::id).collect();
        let (selected, mut untouched): (Vec<Context>, Vec<Context>) = nested
            .into_iter()
            .partition(|nested| nested.is_done() && ids.contains(&nested.id()));

        self.emit(Event::compensation_started(
            ctx.id(),
            &self.name,
            selected.len(),
        ))
        .await;
        if selected.is_empty() {
            Self::restore(ctx, &order, untouched);
            return Ok(Rollback::default());
        }

        let listener = Arc::new(CompletionListener::new(Phase::Undo, selected.len()));
        let dispatched = self
            .composer
            .rollback(selected.into(), Arc::clone(&listener))
            .await;
        if dispatched.is_ok() {
            listener.wait().await;
        }
        let outcome = listener.take_outcome();
        let failure = outcome
            .first_failure()
            .map(|nested| self.failure_of(nested, "rollback"));
        let BatchOutcome {
            mut contexts,
            succeeded,
            ..
        } = outcome;
        untouched.append(&mut contexts);
        Self::restore(ctx, &order, untouched);

        match dispatched {
            Ok(()) => Ok(Rollback { succeeded, failure }),
            Err(err) if err.is_interrupted() => Err(CommandError::Interrupted(self.name.clone())),
            Err(err) => Err(err),
        }
    }

    async fn run_undo(&self, ctx: &mut Context) -> Result<(), CommandError> {
        self.validate(ctx)?;
        if !ctx.is_done() || !ctx.start_work() {
            return Err(self.invalid_state(ctx));
        }

        let ids = match ctx.undo_input() {
            Some(Input::Compensation(ids)) => ids.clone(),
            _ => {
                debug!(
                    command = %self.name,
                    context = %ctx.id(),
                    "no compensation list, rolling back every done nested context"
                );
                ctx.macro_parameter()
                    .map(|param| {
                        param
                            .nested()
                            .iter()
                            .filter(|nested| nested.is_done())
                            .map(Context::id)
                            .collect()
                    })
                    .unwrap_or_default()
            }
        };

        let rollback = match self.compensate(ctx, &ids).await {
            Ok(rollback) => rollback,
            Err(err) => {
                ctx.failed(err.clone());
                self.emit(Event::macro_failed(ctx.id(), &self.name, err.to_string()))
                    .await;
                return Err(err);
            }
        };

        let Some(err) = rollback.failure else {
            ctx.set_undone();
            debug!(command = %self.name, context = %ctx.id(), "macro undone");
            return Ok(());
        };

        warn!(
            command = %self.name,
            context = %ctx.id(),
            error = %err,
            redo = rollback.succeeded.len(),
            "rollback failed, redoing reverted nested commands"
        );
        ctx.failed(err.clone());
        self.emit(Event::macro_failed(ctx.id(), &self.name, err.to_string()))
            .await;

        if let Some(param) = ctx.macro_parameter_mut() {
            for nested in param.nested_mut().iter_mut() {
                if rollback.succeeded.contains(&nested.id()) {
                    run_action(Phase::Do, nested).await;
                }
            }
        }
        Ok(())
    }
}

/// What a compensation batch left behind.
#[derive(Debug, Default)]
struct Rollback {
    /// Ids of nested contexts that were reverted, in completion order.
    succeeded: Vec<ContextId>,
    /// Error of the first nested context whose undo failed.
    failure: Option<CommandError>,
}

/// Sort contexts by their position in `order`.
fn arrange(order: &[ContextId], mut contexts: Vec<Context>) -> VecDeque<Context> {
    contexts.sort_by_key(|ctx| {
        order
            .iter()
            .position(|id| *id == ctx.id())
            .unwrap_or(usize::MAX)
    });
    contexts.into()
}

#[async_trait]
impl Command for MacroCommand {
    fn name(&self) -> &str {
        &self.name
    }

    /// Build one `Ready` context per nested command, each prepared with the
    /// same input. Seals the macro.
    fn prepare_input(&self, input: Value) -> Input {
        let commands = {
            let nested = self.nested.read();
            self.sealed.store(true, Ordering::SeqCst);
            nested.clone()
        };
        let contexts = commands
            .iter()
            .map(|command| Context::for_command(Arc::clone(command), input.clone()))
            .collect();
        Input::Macro(MacroParameter::new(input, contexts))
    }

    async fn do_command(&self, ctx: &mut Context) -> Result<(), CommandError> {
        let span = info_span!(
            "macro_do",
            command = %self.name,
            composer = self.composer.name(),
            context = %ctx.id(),
        );
        self.run_do(ctx).instrument(span).await
    }

    async fn undo_command(&self, ctx: &mut Context) -> Result<(), CommandError> {
        let span = info_span!(
            "macro_undo",
            command = %self.name,
            composer = self.composer.name(),
            context = %ctx.id(),
        );
        self.run_undo(ctx).instrument(span).await
    }

    /// Replace the macro's input with `previous` and offer it to every
    /// nested command, mirroring how the input was first prepared.
    ///
    /// Nested commands that decline keep their input and get a warning.
    fn transfer_result(&self, previous: &Value, ctx: &mut Context) -> Result<(), CommandError> {
        let param = ctx
            .macro_parameter_mut()
            .ok_or_else(|| CommandError::WrongContextType {
                command: self.name.clone(),
                expected: "macro",
            })?;
        param.set_root_input(previous.clone());
        for nested in param.nested_mut().iter_mut() {
            let command = Arc::clone(nested.command());
            if let Err(err) = command.transfer_result(previous, nested) {
                nested.record_warning(format!("result transfer declined: {err}"));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MacroCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacroCommand")
            .field("name", &self.name)
            .field("composer", &self.composer.name())
            .field("nested", &self.nested.read().len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
