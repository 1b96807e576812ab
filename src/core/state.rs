//! Context lifecycle states and state-change notification.
//!
//! A context moves through `Init -> Ready -> Work -> {Done | Failed}`, may be
//! reverted `Done -> Work -> Undone`, and can be forced into `Cancelled`
//! before it ever runs. Every transition is delivered to registered
//! [`ContextListener`]s as a [`StateChanged`] event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::ContextId;

/// Lifecycle state of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Created, no redo input attached yet.
    Init,
    /// Redo input attached, ready to run.
    Ready,
    /// A do or undo action is running.
    Work,
    /// The do action finished successfully.
    Done,
    /// The do or undo action failed.
    Failed,
    /// The undo action finished successfully.
    Undone,
    /// Never executed; skipped by the orchestrator.
    Cancelled,
}

impl State {
    /// States in which no further automatic progress happens.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Done | State::Failed | State::Undone | State::Cancelled
        )
    }

    /// States that close a work interval and get a duration record.
    pub fn ends_work(&self) -> bool {
        matches!(self, State::Done | State::Failed | State::Undone)
    }

    /// States from which work may (re)start.
    pub fn can_start_work(&self) -> bool {
        matches!(self, State::Ready | State::Done | State::Undone)
    }

    /// States in which an undo input may be attached.
    pub fn accepts_undo_input(&self) -> bool {
        matches!(self, State::Done | State::Work)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Init => "INIT",
            State::Ready => "READY",
            State::Work => "WORK",
            State::Done => "DONE",
            State::Failed => "FAIL",
            State::Undone => "UNDONE",
            State::Cancelled => "CANCEL",
        };
        f.write_str(name)
    }
}

/// A single state transition of a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChanged {
    /// The context that changed.
    pub context_id: ContextId,
    /// Name of the command owning the context.
    pub command: String,
    /// State before the transition.
    pub previous: State,
    /// State after the transition.
    pub current: State,
    /// Wall-clock time of the transition.
    pub at: DateTime<Utc>,
}

/// Observer of context state transitions.
///
/// Listeners are invoked synchronously, in registration order, before the
/// call that caused the transition returns. A listener that panics is
/// isolated; the transition it observed is not rolled back.
pub trait ContextListener: Send + Sync {
    /// Called after the context has entered `event.current`.
    fn state_changed(&self, event: &StateChanged);
}
