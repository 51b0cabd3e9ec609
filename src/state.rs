//! Supervision state machine
//!
//! [`next_state`] is a pure function of the current state and one tick's
//! [`Observation`]. The supervisor owns each service's state and does the
//! logging around it (see [`TransitionEvent::log`]).
//!
//! | current   | running | should_run | starting | next      |
//! |-----------|---------|------------|----------|-----------|
//! | any       | yes     | yes        | -        | Running   |
//! | any       | yes     | no         | -        | Undefined |
//! | any       | no      | no         | -        | Stopped   |
//! | any       | no      | yes        | yes      | Starting  |
//! | Starting  | no      | yes        | no       | Starting  |
//! | other     | no      | yes        | no       | Down      |
//!
//! A live process always wins over `starting`, which only matters while
//! nothing is running yet.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisionState {
    /// Outside its window and not running
    Stopped,
    /// Told to start recently; not up yet
    Starting,
    /// Inside its window and running
    Running,
    /// Should be running, is not, and the grace period is over
    Down,
    /// Not yet evaluated, or alive when it should be stopped
    #[default]
    Undefined,
}

impl SupervisionState {
    pub const ALL: [SupervisionState; 5] = [
        SupervisionState::Stopped,
        SupervisionState::Starting,
        SupervisionState::Running,
        SupervisionState::Down,
        SupervisionState::Undefined,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SupervisionState::Stopped => "stopped",
            SupervisionState::Starting => "starting",
            SupervisionState::Running => "running",
            SupervisionState::Down => "down",
            SupervisionState::Undefined => "undefined",
        }
    }

    /// States that signal a mismatch between intent and liveness
    pub fn is_anomaly(&self) -> bool {
        matches!(self, SupervisionState::Down | SupervisionState::Undefined)
    }
}

impl fmt::Display for SupervisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inputs for one evaluation, recomputed fresh every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Observation {
    pub should_run: bool,
    pub is_running: bool,
    pub is_starting: bool,
}

impl Observation {
    pub fn new(should_run: bool, is_running: bool, is_starting: bool) -> Self {
        Self {
            should_run,
            is_running,
            is_starting,
        }
    }
}

/// Compute the state that follows `current` given `obs`
pub fn next_state(current: SupervisionState, obs: Observation) -> SupervisionState {
    use SupervisionState::*;

    match (current, obs.is_running, obs.should_run, obs.is_starting) {
        (_, true, true, _) => Running,
        (_, true, false, _) => Undefined,
        (_, false, false, _) => Stopped,
        (Starting, false, true, _) => Starting,
        (_, false, true, true) => Starting,
        (_, false, true, false) => Down,
    }
}

/// One evaluation of one service. Emitted every tick, including ticks where
/// the state does not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub service: String,
    pub previous: SupervisionState,
    pub current: SupervisionState,
    pub should_run: bool,
    pub is_running: bool,
    pub is_starting: bool,
    pub timestamp: NaiveDateTime,
    /// First evaluation of the service since the supervisor started
    #[serde(default)]
    pub initial: bool,
}

impl TransitionEvent {
    pub fn new(
        service: impl Into<String>,
        previous: SupervisionState,
        obs: Observation,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            service: service.into(),
            previous,
            current: next_state(previous, obs),
            should_run: obs.should_run,
            is_running: obs.is_running,
            is_starting: obs.is_starting,
            timestamp,
            initial: false,
        }
    }

    /// Mark as the service's first evaluation. Its `previous` is only the
    /// placeholder `Undefined`, so landing in an anomaly still counts as
    /// entering it.
    pub fn first_evaluation(mut self) -> Self {
        self.initial = true;
        self
    }

    pub fn observation(&self) -> Observation {
        Observation::new(self.should_run, self.is_running, self.is_starting)
    }

    pub fn is_change(&self) -> bool {
        self.previous != self.current
    }

    /// Entry into Down or Undefined
    pub fn is_alert(&self) -> bool {
        (self.initial || self.is_change()) && self.current.is_anomaly()
    }

    /// Entries into anomaly states go to `warn`; everything else to `debug`.
    pub fn log(&self) {
        if self.is_alert() {
            tracing::warn!(
                service = %self.service,
                from = %self.previous,
                to = %self.current,
                should_run = self.should_run,
                is_running = self.is_running,
                is_starting = self.is_starting,
                "[{}] {} -> {}",
                self.service,
                self.previous,
                self.current
            );
        } else if self.is_change() {
            tracing::debug!(
                service = %self.service,
                from = %self.previous,
                to = %self.current,
                should_run = self.should_run,
                is_running = self.is_running,
                is_starting = self.is_starting,
                "[{}] {} -> {}",
                self.service,
                self.previous,
                self.current
            );
        } else {
            tracing::debug!(
                service = %self.service,
                state = %self.current,
                should_run = self.should_run,
                is_running = self.is_running,
                is_starting = self.is_starting,
                "[{}] still {}",
                self.service,
                self.current
            );
        }
    }
}
