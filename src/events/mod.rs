//! Lifecycle events and event handling.
//!
//! This module provides event emission for macro-command lifecycle events,
//! enabling observability into composite execution and compensation.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::ContextId;

/// Lifecycle events emitted by macro-commands.
#[derive(Debug, Clone)]
pub enum Event {
    /// A macro-command started running its nested commands.
    MacroStarted {
        context_id: ContextId,
        command: String,
        nested: usize,
        timestamp: Instant,
    },

    /// A macro-command finished successfully.
    MacroCompleted {
        context_id: ContextId,
        command: String,
        duration: Option<Duration>,
        timestamp: Instant,
    },

    /// A macro-command failed.
    ///
    /// Emitted both for a failed "do" and for a failed "undo".
    MacroFailed {
        context_id: ContextId,
        command: String,
        error: String,
        timestamp: Instant,
    },

    /// Nested contexts of a macro-command are being rolled back.
    CompensationStarted {
        context_id: ContextId,
        command: String,
        /// Number of nested contexts selected for rollback.
        contexts: usize,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::MacroStarted { timestamp, .. } => *timestamp,
            Event::MacroCompleted { timestamp, .. } => *timestamp,
            Event::MacroFailed { timestamp, .. } => *timestamp,
            Event::CompensationStarted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the id of the macro context the event is about.
    pub fn context_id(&self) -> ContextId {
        match self {
            Event::MacroStarted { context_id, .. }
            | Event::MacroCompleted { context_id, .. }
            | Event::MacroFailed { context_id, .. }
            | Event::CompensationStarted { context_id, .. } => *context_id,
        }
    }

    /// Create a MacroStarted event.
    pub fn macro_started(context_id: ContextId, command: impl Into<String>, nested: usize) -> Self {
        Event::MacroStarted {
            context_id,
            command: command.into(),
            nested,
            timestamp: Instant::now(),
        }
    }

    /// Create a MacroCompleted event.
    pub fn macro_completed(
        context_id: ContextId,
        command: impl Into<String>,
        duration: Option<Duration>,
    ) -> Self {
        Event::MacroCompleted {
            context_id,
            command: command.into(),
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a MacroFailed event.
    pub fn macro_failed(context_id: ContextId, command: impl Into<String>, error: String) -> Self {
        Event::MacroFailed {
            context_id,
            command: command.into(),
            error,
            timestamp: Instant::now(),
        }
    }

    /// Create a CompensationStarted event.
    pub fn compensation_started(
        context_id: ContextId,
        command: impl Into<String>,
        contexts: usize,
    ) -> Self {
        Event::CompensationStarted {
            context_id,
            command: command.into(),
            contexts,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
