//! Unit lifecycle state machine

use crate::error::{MutationError, SchedulerError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use wb_history::CompoundId;

/// Lifecycle phase of a mutation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Pending,
    Running,
    Done,
    Error,
    Aborted,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a lifecycle transition.
///
/// `Error` is left either by a retry (back to `Running`) or by giving up
/// (`Aborted`); it only stays final when the unit's edits could neither be
/// rolled back nor recorded in history.
///
/// # Errors
/// [`SchedulerError::IllegalTransition`] for anything not listed in
/// [`allowed_transitions`].
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), SchedulerError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SchedulerError::IllegalTransition { from, to })
    }
}

#[must_use]
pub fn allowed_transitions(from: Phase) -> &'static [Phase] {
    use Phase::*;
    match from {
        Pending => &[Running, Aborted],
        Running => &[Done, Error, Aborted],
        Error => &[Running, Aborted],
        Done | Aborted => &[],
    }
}

/// Final result of a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    /// `Done`, `Aborted`, or `Error` when a rollback failed or history
    /// refused the unit's edits
    pub phase: Phase,
    /// History entry holding the unit's edits, if any were kept
    pub compound: Option<CompoundId>,
    /// Last failure, if the unit failed at least once
    pub error: Option<MutationError>,
    /// Number of execution attempts
    pub attempts: u32,
}

impl UnitOutcome {
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }
}

/// Lifecycle status shared between the scheduler and unit handles
#[derive(Debug)]
pub(crate) struct UnitStatus {
    phase: Mutex<Phase>,
    outcome: watch::Sender<Option<UnitOutcome>>,
}

impl UnitStatus {
    pub(crate) fn new() -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            phase: Mutex::new(Phase::Pending),
            outcome,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Move to `to`, returning the previous phase
    pub(crate) fn advance(&self, to: Phase) -> Result<Phase, SchedulerError> {
        let mut phase = self.phase.lock();
        validate_transition(*phase, to)?;
        let from = *phase;
        *phase = to;
        Ok(from)
    }

    pub(crate) fn finish(&self, outcome: UnitOutcome) {
        self.outcome.send_replace(Some(outcome));
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<UnitOutcome>> {
        self.outcome.subscribe()
    }
}
