//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use cascade::testing::{Ledger, ScriptedCommand};
use cascade::{Context, Event, EventHandler, MacroCommand, ParallelComposer, State, WorkerPool};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Build a sequential macro from scripted steps.
pub fn sequential_macro(name: &str, steps: Vec<ScriptedCommand>) -> Arc<MacroCommand> {
    let command = MacroCommand::sequential(name);
    for step in steps {
        command.add_nested(step.into_command()).unwrap();
    }
    Arc::new(command)
}

/// Build a parallel macro over a fresh pool of `workers`.
pub fn parallel_macro(name: &str, workers: usize, steps: Vec<ScriptedCommand>) -> Arc<MacroCommand> {
    let composer = ParallelComposer::new(Arc::new(WorkerPool::new(workers)));
    let command = MacroCommand::parallel(name, composer);
    for step in steps {
        command.add_nested(step.into_command()).unwrap();
    }
    Arc::new(command)
}

/// Nested contexts of a macro context, in original order.
pub fn nested(ctx: &Context) -> &VecDeque<Context> {
    ctx.macro_parameter()
        .expect("not a macro context")
        .nested()
}

/// States of the nested contexts, in original order.
pub fn nested_states(ctx: &Context) -> Vec<State> {
    nested(ctx).iter().map(Context::state).collect()
}

/// `n` scripted steps named `step-0..n` sharing one ledger.
pub fn steps(ledger: &Arc<Ledger>, n: usize) -> Vec<ScriptedCommand> {
    (0..n)
        .map(|i| ScriptedCommand::new(format!("step-{i}"), ledger))
        .collect()
}

/// Recording event handler for verifying events.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
