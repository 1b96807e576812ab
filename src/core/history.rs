//! Timestamped history of a context.
//!
//! [`History`] observes every transition of the context that owns it and
//! keeps three append-only records: every state entered, every start of
//! work (with the state it started from), and the duration of every work
//! interval (with the state that ended it).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::state::{State, StateChanged};

/// A state the context entered, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: State,
    pub at: DateTime<Utc>,
}

/// Start of a work interval, with the state it started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRecord {
    pub previous: State,
    pub at: DateTime<Utc>,
}

/// A finished work interval, with the state that ended it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRecord {
    pub state: State,
    #[serde(with = "serde_millis")]
    pub duration: Duration,
}

/// Append-only transition history.
#[derive(Debug, Default)]
pub struct History {
    states: Vec<StateRecord>,
    started: Vec<StartRecord>,
    durations: Vec<DurationRecord>,
    work_started: Option<Instant>,
}

impl History {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the initial state of a freshly created context.
    pub(crate) fn record_initial(&mut self, state: State, at: DateTime<Utc>) {
        self.states.push(StateRecord { state, at });
    }

    /// Record a transition.
    ///
    /// Returns the duration of the work interval the transition closed, if any.
    pub(crate) fn observe(&mut self, event: &StateChanged, now: Instant) -> Option<Duration> {
        self.states.push(StateRecord {
            state: event.current,
            at: event.at,
        });

        if event.current == State::Work {
            self.started.push(StartRecord {
                previous: event.previous,
                at: event.at,
            });
            self.work_started = Some(now);
            return None;
        }

        if event.previous == State::Work && event.current.ends_work() {
            if let Some(start) = self.work_started.take() {
                let duration = now.saturating_duration_since(start);
                self.durations.push(DurationRecord {
                    state: event.current,
                    duration,
                });
                return Some(duration);
            }
        }

        // Leaving WORK any other way (e.g. forced cancel) abandons the interval.
        if event.previous == State::Work {
            self.work_started = None;
        }
        None
    }

    /// Every state entered, oldest first.
    pub fn states(&self) -> Vec<StateRecord> {
        self.states.clone()
    }

    /// Every start of work, oldest first.
    pub fn started(&self) -> Vec<StartRecord> {
        self.started.clone()
    }

    /// Every finished work interval, oldest first.
    pub fn durations(&self) -> Vec<DurationRecord> {
        self.durations.clone()
    }

    /// The most recently recorded state.
    pub fn last_state(&self) -> Option<State> {
        self.states.last().map(|r| r.state)
    }
}

/// Serde helper for Duration serialization as whole milliseconds.
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
